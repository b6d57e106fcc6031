//! Per-locus splicing graph.
//!
//! Exon boundaries of all transcripts in a locus cut the covered region
//! into atomic exonic segments (simple edges). Runs of consecutive
//! segments along a transcript that a single read can span become
//! junction super-edges, and mates of a fragment that land on different
//! units are tied together by paired links. Every edge carries the
//! signature of the transcripts that traverse it and the reads observed
//! on it, split by direction relative to the locus reference strand.
//!
//! Edges live in one arena and are addressed by [`EdgeId`]; simple edges
//! occupy the first slots in genomic order.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bitvec::prelude::*;
use config::Strand;
use hashbrown::HashMap;
use packbed::{GenePred, Locus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Sense,
    Antisense,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Sense, Direction::Antisense];

    #[inline(always)]
    pub fn index(&self) -> usize {
        match self {
            Direction::Sense => 0,
            Direction::Antisense => 1,
        }
    }

    pub fn flip(&self) -> Self {
        match self {
            Direction::Sense => Direction::Antisense,
            Direction::Antisense => Direction::Sense,
        }
    }

    /// direction of a strand relative to a reference strand
    pub fn of(strand: Strand, reference: Strand) -> Self {
        if strand == reference {
            Direction::Sense
        } else {
            Direction::Antisense
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(pub usize);

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Set of locus transcripts (by position) traversing an edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature(BitVec);

impl Signature {
    pub fn empty(n: usize) -> Self {
        Signature(bitvec![0; n])
    }

    pub fn insert(&mut self, tx: usize) {
        self.0.set(tx, true);
    }

    pub fn contains(&self, tx: usize) -> bool {
        self.0.get(tx).map(|bit| *bit).unwrap_or(false)
    }

    pub fn intersection(&self, other: &Signature) -> Signature {
        Signature(
            self.0
                .iter()
                .by_vals()
                .zip(other.0.iter().by_vals())
                .map(|(a, b)| a && b)
                .collect(),
        )
    }

    pub fn intersects(&self, other: &Signature) -> bool {
        self.iter().any(|tx| other.contains(tx))
    }

    pub fn is_empty(&self) -> bool {
        self.0.not_any()
    }

    pub fn len(&self) -> usize {
        self.0.count_ones()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter_ones()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EdgeKind {
    Simple { start: u64, end: u64 },
    Junction { parts: Vec<EdgeId> },
    PairedLink { mates: [EdgeId; 2] },
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub kind: EdgeKind,
    pub signature: Signature,
    pub counts: [f64; 2],
    pub supers: Vec<EdgeId>,
}

impl Edge {
    fn new(kind: EdgeKind, signature: Signature) -> Self {
        Self {
            kind,
            signature,
            counts: [0.0; 2],
            supers: Vec::new(),
        }
    }

    /// genomic length of a simple edge
    pub fn length(&self) -> Option<u64> {
        match self.kind {
            EdgeKind::Simple { start, end } => Some(end - start),
            _ => None,
        }
    }

    /// reads observed in one direction, or in both when `None`
    pub fn observed(&self, direction: Option<Direction>) -> f64 {
        match direction {
            Some(d) => self.counts[d.index()],
            None => self.counts.iter().sum(),
        }
    }

    /// sub-edge a super-edge hangs from when walked in `direction`
    pub fn anchor(&self, direction: Direction) -> Option<EdgeId> {
        match (&self.kind, direction) {
            (EdgeKind::Simple { .. }, _) => None,
            (EdgeKind::Junction { parts }, Direction::Sense) => parts.first().copied(),
            (EdgeKind::Junction { parts }, Direction::Antisense) => parts.last().copied(),
            (EdgeKind::PairedLink { mates }, d) => Some(mates[d.index()]),
        }
    }

    pub fn is_paired_link(&self) -> bool {
        matches!(self.kind, EdgeKind::PairedLink { .. })
    }
}

#[derive(Debug)]
pub struct SplicingGraph {
    strand: Strand,
    transcripts: Vec<Arc<GenePred>>,
    edges: Vec<Edge>,
    n_segments: usize,
    paths: HashMap<Vec<usize>, EdgeId>,
    links: HashMap<(EdgeId, EdgeId), EdgeId>,
    tx_paths: Vec<Vec<usize>>,
    tx_offsets: Vec<Vec<u64>>,
    read_length: u64,
    pub mapped: u64,
    pub unassigned: u64,
    pub inconsistent: u64,
}

impl SplicingGraph {
    /// Build the graph of a locus and observe its reads. The read length
    /// used for fractions is `read_length` or the most frequent aligned
    /// length among the reads.
    pub fn build(
        locus: &Locus,
        reads: &[GenePred],
        read_length: Option<u64>,
        paired_end: bool,
    ) -> Self {
        let transcripts: Vec<Arc<GenePred>> = locus.transcripts().cloned().collect();
        let n_tx = transcripts.len();

        let boundaries: Vec<u64> = transcripts
            .iter()
            .flat_map(|tx| tx.exons.iter().flat_map(|&(s, e)| [s, e]))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut edges = Vec::new();
        for window in boundaries.windows(2) {
            let (start, end) = (window[0], window[1]);
            let mut signature = Signature::empty(n_tx);

            for (t, tx) in transcripts.iter().enumerate() {
                if tx.exons.iter().any(|&(s, e)| s <= start && end <= e) {
                    signature.insert(t);
                }
            }

            if !signature.is_empty() {
                edges.push(Edge::new(EdgeKind::Simple { start, end }, signature));
            }
        }
        let n_segments = edges.len();

        let mut tx_paths = Vec::with_capacity(n_tx);
        let mut tx_offsets = Vec::with_capacity(n_tx);
        for t in 0..n_tx {
            let path: Vec<usize> = (0..n_segments)
                .filter(|&seg| edges[seg].signature.contains(t))
                .collect();

            let mut offset = 0;
            let offsets = path
                .iter()
                .map(|&seg| {
                    let here = offset;
                    offset += edges[seg].length().unwrap_or(0);
                    here
                })
                .collect();

            tx_paths.push(path);
            tx_offsets.push(offsets);
        }

        let read_length = read_length.unwrap_or_else(|| modal_length(reads)).max(1);
        let span_limit = reads
            .iter()
            .map(GenePred::length)
            .max()
            .unwrap_or(0)
            .max(read_length);

        let mut graph = SplicingGraph {
            strand: locus.strand(),
            transcripts,
            edges,
            n_segments,
            paths: HashMap::new(),
            links: HashMap::new(),
            tx_paths,
            tx_offsets,
            read_length,
            mapped: 0,
            unassigned: 0,
            inconsistent: 0,
        };

        graph.add_junctions(span_limit);
        graph.observe(reads, paired_end);

        graph
    }

    /// Every run of consecutive segments of a transcript that a read of
    /// `span_limit` bases can touch at both ends.
    fn add_junctions(&mut self, span_limit: u64) {
        let n_tx = self.transcripts.len();
        let mut junctions: BTreeMap<Vec<usize>, Signature> = BTreeMap::new();

        for (t, path) in self.tx_paths.iter().enumerate() {
            for i in 0..path.len() {
                let mut inner = 0;
                for j in (i + 1)..path.len() {
                    if inner + 2 > span_limit {
                        break;
                    }

                    junctions
                        .entry(path[i..=j].to_vec())
                        .or_insert_with(|| Signature::empty(n_tx))
                        .insert(t);

                    inner += self.edges[path[j]].length().unwrap_or(0);
                }
            }
        }

        for (path, signature) in junctions {
            let id = EdgeId(self.edges.len());
            let parts = path.iter().map(|&seg| EdgeId(seg)).collect();

            for &seg in path.iter() {
                self.edges[seg].supers.push(id);
            }

            self.edges
                .push(Edge::new(EdgeKind::Junction { parts }, signature));
            self.paths.insert(path, id);
        }
    }

    fn observe(&mut self, reads: &[GenePred], paired_end: bool) {
        let mut mates: HashMap<&str, (EdgeId, Direction)> = HashMap::new();

        for read in reads {
            let Some(unit) = self.assign(read) else {
                self.unassigned += 1;
                continue;
            };

            let direction = Direction::of(read.strand, self.strand);
            self.edges[unit.0].counts[direction.index()] += 1.0;
            self.mapped += 1;

            if paired_end && read.mate().is_some() {
                match mates.remove(read.fragment_name()) {
                    Some((other, first_direction)) => self.link(other, unit, first_direction),
                    None => {
                        mates.insert(read.fragment_name(), (unit, direction));
                    }
                }
            }
        }
    }

    fn link(&mut self, a: EdgeId, b: EdgeId, direction: Direction) {
        if a == b {
            return;
        }

        let key = (a.min(b), a.max(b));
        if let Some(&id) = self.links.get(&key) {
            self.edges[id.0].counts[direction.index()] += 1.0;
            return;
        }

        let signature = self.edges[a.0]
            .signature
            .intersection(&self.edges[b.0].signature);
        if signature.is_empty() {
            self.inconsistent += 1;
            return;
        }

        let id = EdgeId(self.edges.len());
        let mut edge = Edge::new(
            EdgeKind::PairedLink {
                mates: [key.0, key.1],
            },
            signature,
        );
        edge.counts[direction.index()] += 1.0;

        self.edges.push(edge);
        self.edges[key.0 .0].supers.push(id);
        self.edges[key.1 .0].supers.push(id);
        self.links.insert(key, id);
    }

    /// Unit (simple or junction edge) whose segment path matches the read
    /// blocks exactly, if any.
    pub fn assign(&self, read: &GenePred) -> Option<EdgeId> {
        let path = self.locate(read)?;

        if path.len() == 1 {
            Some(EdgeId(path[0]))
        } else {
            self.paths.get(&path).copied()
        }
    }

    fn locate(&self, read: &GenePred) -> Option<Vec<usize>> {
        let mut path: Vec<usize> = Vec::new();

        for (k, &(start, end)) in read.exons.iter().enumerate() {
            let mut current = self.segment_at(start)?;

            if k > 0 {
                let previous = *path.last()?;
                if self.segment(current).0 != start || self.segment(previous).1 != read.exons[k - 1].1
                {
                    return None;
                }
            }

            path.push(current);
            while self.segment(current).1 < end {
                let next = current + 1;
                if next >= self.n_segments || self.segment(next).0 != self.segment(current).1 {
                    return None;
                }
                path.push(next);
                current = next;
            }
        }

        Some(path)
    }

    fn segment_at(&self, pos: u64) -> Option<usize> {
        let idx = self.edges[..self.n_segments]
            .partition_point(|edge| self.segment_of(edge).0 <= pos)
            .checked_sub(1)?;

        (pos < self.segment(idx).1).then_some(idx)
    }

    #[inline(always)]
    fn segment(&self, idx: usize) -> (u64, u64) {
        self.segment_of(&self.edges[idx])
    }

    #[inline(always)]
    fn segment_of(&self, edge: &Edge) -> (u64, u64) {
        match edge.kind {
            EdgeKind::Simple { start, end } => (start, end),
            _ => (0, 0),
        }
    }

    /// Half-open window of read start positions, in 5'->3' transcript
    /// coordinates, for reads of `read_length` that fall exactly on `unit`.
    /// `None` when the transcript does not traverse the unit.
    pub fn window(&self, unit: EdgeId, tx: usize, read_length: u64) -> Option<(i64, i64)> {
        let edge = self.edges.get(unit.0)?;
        if !edge.signature.contains(tx) {
            return None;
        }

        let (first, last) = match &edge.kind {
            EdgeKind::Simple { .. } => (unit.0, unit.0),
            EdgeKind::Junction { parts } => (parts.first()?.0, parts.last()?.0),
            EdgeKind::PairedLink { .. } => return None,
        };

        let path = &self.tx_paths[tx];
        let (ia, ib) = (
            path.binary_search(&first).ok()?,
            path.binary_search(&last).ok()?,
        );

        let r = read_length as i64;
        let a0 = self.tx_offsets[tx][ia] as i64;
        let a1 = a0 + self.edges[first].length()? as i64;
        let b0 = self.tx_offsets[tx][ib] as i64;
        let b1 = b0 + self.edges[last].length()? as i64;

        let lo = a0.max(b0 + 1 - r);
        let hi = a1.min(b1 + 1 - r);

        match self.transcripts[tx].strand {
            Strand::Forward => Some((lo, hi)),
            Strand::Reverse => {
                let len = self.transcripts[tx].length() as i64;
                Some((len - r - hi + 1, len - r - lo + 1))
            }
        }
    }

    pub fn strand(&self) -> Strand {
        self.strand
    }

    pub fn transcripts(&self) -> &[Arc<GenePred>] {
        &self.transcripts
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id.0]
    }

    /// simple edges in genomic order
    pub fn segments(&self) -> impl Iterator<Item = EdgeId> {
        (0..self.n_segments).map(EdgeId)
    }

    pub fn read_length(&self) -> u64 {
        self.read_length
    }

    /// direction a transcript sees when the locus is walked in `direction`
    pub fn transcript_direction(&self, tx: usize, direction: Direction) -> Direction {
        if self.transcripts[tx].strand == self.strand {
            direction
        } else {
            direction.flip()
        }
    }
}

/// most frequent aligned length, ties to the longer one
fn modal_length(reads: &[GenePred]) -> u64 {
    let mut freq: BTreeMap<u64, usize> = BTreeMap::new();
    for read in reads {
        *freq.entry(read.length()).or_default() += 1;
    }

    freq.into_iter()
        .max_by_key(|&(len, n)| (n, len))
        .map(|(len, _)| len)
        .unwrap_or(1)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use packbed::{cluster_genes, Gene};

    pub(crate) fn tx(name: &str, strand: Strand, exons: &[(u64, u64)]) -> Arc<GenePred> {
        Arc::new(record(name, strand, exons, true))
    }

    pub(crate) fn read(name: &str, strand: Strand, blocks: &[(u64, u64)]) -> GenePred {
        record(name, strand, blocks, false)
    }

    fn record(name: &str, strand: Strand, exons: &[(u64, u64)], is_ref: bool) -> GenePred {
        let start = exons[0].0;
        let end = exons[exons.len() - 1].1;

        GenePred {
            name: name.into(),
            chrom: "chr1".into(),
            strand,
            start,
            end,
            cds_start: start,
            cds_end: end,
            exons: exons.to_vec(),
            introns: exons.windows(2).map(|w| (w[0].1, w[1].0)).collect(),
            exon_count: exons.len(),
            gene: None,
            is_ref,
        }
    }

    /// A = S + UA, B = S + UB on the forward strand
    pub(crate) fn two_isoform_locus() -> Locus {
        let a = tx("A", Strand::Forward, &[(1000, 1500), (2000, 2500)]);
        let b = tx("B", Strand::Forward, &[(1000, 1500), (3000, 4000)]);
        let gene = Gene::new("G".into(), vec![a, b]).unwrap();

        cluster_genes(vec![gene]).pop().unwrap()
    }

    #[test]
    fn test_segments_and_signatures() {
        let graph = SplicingGraph::build(&two_isoform_locus(), &[], Some(1), false);
        let spans: Vec<_> = graph.segments().map(|id| graph.edge(id).kind.clone()).collect();

        assert_eq!(
            spans,
            vec![
                EdgeKind::Simple { start: 1000, end: 1500 },
                EdgeKind::Simple { start: 2000, end: 2500 },
                EdgeKind::Simple { start: 3000, end: 4000 },
            ]
        );
        assert_eq!(graph.edge(EdgeId(0)).signature.len(), 2);
        assert!(graph.edge(EdgeId(1)).signature.contains(0));
        assert!(!graph.edge(EdgeId(1)).signature.contains(1));
        // r = 1 cannot span a junction
        assert_eq!(graph.edges().len(), 3);
    }

    #[test]
    fn test_junctions_and_assignment() {
        let reads = vec![
            read("r1", Strand::Forward, &[(1100, 1200)]),
            read("r2", Strand::Forward, &[(1450, 1500), (2000, 2050)]),
            read("r3", Strand::Reverse, &[(1450, 1500), (3000, 3050)]),
            read("r4", Strand::Forward, &[(1450, 1500), (2100, 2150)]),
            read("r5", Strand::Forward, &[(1600, 1700)]),
        ];
        let graph = SplicingGraph::build(&two_isoform_locus(), &reads, None, false);

        assert_eq!(graph.read_length(), 100);
        assert_eq!(graph.edges().len(), 5);

        let ja = graph.assign(&reads[1]).unwrap();
        let jb = graph.assign(&reads[2]).unwrap();
        assert_eq!(
            graph.edge(ja).kind,
            EdgeKind::Junction {
                parts: vec![EdgeId(0), EdgeId(1)]
            }
        );
        assert!(graph.edge(EdgeId(0)).supers.contains(&ja));
        assert!(graph.edge(EdgeId(2)).supers.contains(&jb));
        assert_eq!(graph.edge(jb).counts, [0.0, 1.0]);

        assert_eq!(graph.assign(&reads[0]), Some(EdgeId(0)));
        assert_eq!(graph.assign(&reads[3]), None);
        assert_eq!(graph.assign(&reads[4]), None);
        assert_eq!((graph.mapped, graph.unassigned), (3, 2));
    }

    #[test]
    fn test_windows_partition_transcript() {
        let graph = SplicingGraph::build(&two_isoform_locus(), &[], Some(100), false);
        let r = 100;

        // transcript A: 1000 bases, 901 read starts
        let mut covered = 0;
        for (id, edge) in graph.edges().iter().enumerate() {
            if let Some((lo, hi)) = graph.window(EdgeId(id), 0, r) {
                if edge.signature.contains(0) {
                    covered += (hi - lo).max(0);
                }
            }
        }
        assert_eq!(covered, 901);

        assert_eq!(graph.window(EdgeId(0), 0, r), Some((0, 401)));
        assert_eq!(graph.window(EdgeId(2), 0, r), None);
    }

    #[test]
    fn test_window_reverse_strand() {
        let a = tx("A", Strand::Reverse, &[(0, 100), (200, 300)]);
        let b = tx("B", Strand::Reverse, &[(0, 100)]);
        let locus = cluster_genes(vec![Gene::new("G".into(), vec![a, b]).unwrap()])
            .pop()
            .unwrap();
        let graph = SplicingGraph::build(&locus, &[], Some(10), false);

        let a = graph
            .transcripts()
            .iter()
            .position(|t| t.name == "A")
            .unwrap();
        assert_eq!(a, 1);

        // genomic-first segment is the 3' end of A
        assert_eq!(graph.window(EdgeId(0), a, 10), Some((100, 191)));
        assert_eq!(graph.window(EdgeId(1), a, 10), Some((0, 91)));
    }

    #[test]
    fn test_paired_links() {
        let reads = vec![
            read("f1/1", Strand::Forward, &[(1100, 1200)]),
            read("f2/1", Strand::Forward, &[(1100, 1200)]),
            read("f1/2", Strand::Reverse, &[(2100, 2200)]),
            read("f2/2", Strand::Reverse, &[(3100, 3200)]),
            read("f3/1", Strand::Forward, &[(2100, 2200)]),
            read("f3/2", Strand::Reverse, &[(3100, 3200)]),
        ];
        let graph = SplicingGraph::build(&two_isoform_locus(), &reads, Some(100), true);

        let links: Vec<&Edge> = graph.edges().iter().filter(|e| e.is_paired_link()).collect();
        assert_eq!(links.len(), 2);
        assert_eq!(graph.inconsistent, 1);
        assert_eq!(graph.mapped, 6);

        let ab = links
            .iter()
            .find(|e| e.anchor(Direction::Antisense) == Some(EdgeId(1)))
            .unwrap();
        assert!(ab.signature.contains(0));
        assert!(!ab.signature.contains(1));
        assert_eq!(ab.counts, [1.0, 0.0]);
    }

    #[test]
    fn test_signature_ops() {
        let mut a = Signature::empty(4);
        let mut b = Signature::empty(4);
        a.insert(0);
        a.insert(2);
        b.insert(2);
        b.insert(3);

        let both = a.intersection(&b);
        assert_eq!(both.iter().collect::<Vec<_>>(), vec![2]);
        assert!(a.intersects(&b));
        assert!(!Signature::empty(4).intersects(&a));
    }
}
