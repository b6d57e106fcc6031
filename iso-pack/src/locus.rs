//! Genes and loci.
//!
//! A locus is a maximal cluster of genes whose genomic spans overlap,
//! regardless of strand. Clusters of one gene are kept as the bare gene;
//! larger clusters are wrapped in a super-locus. Loci on a chromosome are
//! pairwise disjoint and every transcript belongs to exactly one of them.

use std::sync::Arc;

use config::Strand;

use crate::record::GenePred;

/// Anything with an absolute 0-based half-open genomic span.
pub trait Span {
    fn abs_start(&self) -> u64;
    fn abs_end(&self) -> u64;

    #[inline(always)]
    fn overlaps(&self, other: &impl Span) -> bool {
        self.abs_start() < other.abs_end() && other.abs_start() < self.abs_end()
    }
}

impl Span for GenePred {
    fn abs_start(&self) -> u64 {
        self.start
    }

    fn abs_end(&self) -> u64 {
        self.end
    }
}

impl<T: Span> Span for Arc<T> {
    fn abs_start(&self) -> u64 {
        self.as_ref().abs_start()
    }

    fn abs_end(&self) -> u64 {
        self.as_ref().abs_end()
    }
}

/// Interval-merge clustering: sort by absolute start, then sweep a running
/// envelope and absorb every entry that overlaps it.
pub fn cluster<T: Span>(mut items: Vec<T>) -> Vec<Vec<T>> {
    items.sort_by(|a, b| {
        a.abs_start()
            .cmp(&b.abs_start())
            .then(a.abs_end().cmp(&b.abs_end()))
    });

    let mut clusters = Vec::new();
    let mut current: Vec<T> = Vec::new();
    let mut envelope_end = 0;

    for item in items {
        if !current.is_empty() && item.abs_start() < envelope_end {
            envelope_end = envelope_end.max(item.abs_end());
            current.push(item);
            continue;
        }

        if !current.is_empty() {
            clusters.push(std::mem::take(&mut current));
        }

        envelope_end = item.abs_end();
        current.push(item);
    }

    if !current.is_empty() {
        clusters.push(current);
    }

    clusters
}

#[derive(Debug, Clone, PartialEq)]
pub struct Gene {
    pub id: String,
    pub chrom: String,
    pub strand: Strand,
    pub start: u64,
    pub end: u64,
    pub transcripts: Vec<Arc<GenePred>>,
}

impl Gene {
    /// transcripts must be non-empty and share chromosome and strand
    pub fn new(id: String, mut transcripts: Vec<Arc<GenePred>>) -> Option<Self> {
        let first = transcripts.first()?;
        let (chrom, strand) = (first.chrom.clone(), first.strand);

        transcripts.sort_by(|a, b| {
            a.start
                .cmp(&b.start)
                .then(a.end.cmp(&b.end))
                .then(a.name.cmp(&b.name))
        });

        let start = transcripts.iter().map(|tx| tx.start).min()?;
        let end = transcripts.iter().map(|tx| tx.end).max()?;

        Some(Gene {
            id,
            chrom,
            strand,
            start,
            end,
            transcripts,
        })
    }
}

impl Span for Gene {
    fn abs_start(&self) -> u64 {
        self.start
    }

    fn abs_end(&self) -> u64 {
        self.end
    }
}

/// Two or more genes merged by genomic overlap.
#[derive(Debug, Clone, PartialEq)]
pub struct SuperLocus {
    pub id: String,
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub genes: Vec<Gene>,
}

impl SuperLocus {
    fn new(genes: Vec<Gene>) -> Option<Self> {
        let first = genes.first()?;
        let id = genes
            .iter()
            .map(|g| g.id.as_str())
            .collect::<Vec<_>>()
            .join("|");

        Some(SuperLocus {
            id,
            chrom: first.chrom.clone(),
            start: genes.iter().map(|g| g.start).min()?,
            end: genes.iter().map(|g| g.end).max()?,
            genes,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Locus {
    Gene(Gene),
    Super(SuperLocus),
}

impl Locus {
    pub fn id(&self) -> &str {
        match self {
            Locus::Gene(g) => &g.id,
            Locus::Super(s) => &s.id,
        }
    }

    pub fn chrom(&self) -> &str {
        match self {
            Locus::Gene(g) => &g.chrom,
            Locus::Super(s) => &s.chrom,
        }
    }

    pub fn start(&self) -> u64 {
        self.abs_start()
    }

    pub fn end(&self) -> u64 {
        self.abs_end()
    }

    pub fn genes(&self) -> &[Gene] {
        match self {
            Locus::Gene(g) => std::slice::from_ref(g),
            Locus::Super(s) => &s.genes,
        }
    }

    /// reference strand: the strand of the first gene in genomic order
    pub fn strand(&self) -> Strand {
        self.genes()[0].strand
    }

    /// true when the merged genes lie on both strands
    pub fn is_antisense(&self) -> bool {
        let strand = self.strand();
        self.genes().iter().any(|g| g.strand != strand)
    }

    pub fn is_super(&self) -> bool {
        matches!(self, Locus::Super(_))
    }

    pub fn transcripts(&self) -> impl Iterator<Item = &Arc<GenePred>> {
        self.genes().iter().flat_map(|g| g.transcripts.iter())
    }

    pub fn n_transcripts(&self) -> usize {
        self.genes().iter().map(|g| g.transcripts.len()).sum()
    }

    /// 1-based signed start; the sign encodes the reference strand
    pub fn signed_start(&self) -> i64 {
        self.strand().sign() * (self.start() as i64 + 1)
    }

    pub fn signed_end(&self) -> i64 {
        self.strand().sign() * self.end() as i64
    }

    pub fn into_genes(self) -> Vec<Gene> {
        match self {
            Locus::Gene(g) => vec![g],
            Locus::Super(s) => s.genes,
        }
    }
}

impl Span for Locus {
    fn abs_start(&self) -> u64 {
        match self {
            Locus::Gene(g) => g.start,
            Locus::Super(s) => s.start,
        }
    }

    fn abs_end(&self) -> u64 {
        match self {
            Locus::Gene(g) => g.end,
            Locus::Super(s) => s.end,
        }
    }
}

/// Cluster the genes of one chromosome into disjoint loci.
pub fn cluster_genes(genes: Vec<Gene>) -> Vec<Locus> {
    cluster(genes)
        .into_iter()
        .filter_map(|mut group| {
            if group.len() == 1 {
                group.pop().map(Locus::Gene)
            } else {
                SuperLocus::new(group).map(Locus::Super)
            }
        })
        .collect()
}

/// Re-apply the clusterer over the genes of an existing locus set, e.g.
/// after new links tie previously disjoint loci together.
pub fn merge_loci(loci: Vec<Locus>) -> Vec<Locus> {
    let genes = loci.into_iter().flat_map(Locus::into_genes).collect();
    cluster_genes(genes)
}
