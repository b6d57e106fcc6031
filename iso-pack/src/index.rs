use std::sync::Arc;

use anyhow::{bail, Result};
use hashbrown::HashMap;

use crate::locus::{Locus, Span};

/// Per-chromosome loci sorted by start, for mapping a genomic footprint
/// back to the single locus that owns it.
#[derive(Debug, Default)]
pub struct LocusIndex {
    loci: HashMap<String, Vec<Arc<Locus>>>,
}

impl LocusIndex {
    /// Fails when two loci on the same chromosome overlap.
    pub fn new(loci: HashMap<String, Vec<Locus>>) -> Result<Self> {
        let mut index = HashMap::with_capacity(loci.len());

        for (chrom, mut group) in loci {
            group.sort_by_key(|l| (l.start(), l.end()));

            for pair in group.windows(2) {
                if pair[0].overlaps(&pair[1]) {
                    bail!(
                        "Loci {} and {} overlap on {}",
                        pair[0].id(),
                        pair[1].id(),
                        chrom
                    );
                }
            }

            index.insert(chrom, group.into_iter().map(Arc::new).collect());
        }

        Ok(LocusIndex { loci: index })
    }

    /// Slot of the locus containing (or overlapping, when containment is
    /// not required) the half-open region [start, end).
    pub fn position(
        &self,
        chrom: &str,
        start: u64,
        end: u64,
        require_containment: bool,
    ) -> Option<usize> {
        let loci = self.loci.get(chrom)?;
        let idx = loci.partition_point(|l| l.start() <= start);

        if let Some(left) = idx.checked_sub(1) {
            let locus = &loci[left];
            if locus.end() >= end {
                return Some(left);
            }
            if !require_containment && locus.end() > start {
                return Some(left);
            }
        }

        if !require_containment {
            if let Some(right) = loci.get(idx) {
                if right.start() < end {
                    return Some(idx);
                }
            }
        }

        None
    }

    pub fn find_locus(
        &self,
        chrom: &str,
        start: u64,
        end: u64,
        require_containment: bool,
    ) -> Option<&Arc<Locus>> {
        let pos = self.position(chrom, start, end, require_containment)?;
        self.loci.get(chrom).map(|loci| &loci[pos])
    }

    pub fn loci(&self, chrom: &str) -> &[Arc<Locus>] {
        self.loci.get(chrom).map(Vec::as_slice).unwrap_or(&[])
    }

    /// chromosomes in lexicographic order
    pub fn chroms(&self) -> Vec<&String> {
        let mut chroms: Vec<&String> = self.loci.keys().collect();
        chroms.sort();
        chroms
    }

    pub fn len(&self) -> usize {
        self.loci.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn n_transcripts(&self) -> usize {
        self.loci
            .values()
            .flatten()
            .map(|l| l.n_transcripts())
            .sum()
    }
}
