use serde::{Deserialize, Serialize};

pub mod fns;
pub use fns::*;

// numeric values
pub const MIN_THREADS: usize = 1;
pub const MIN_BED_FIELDS: usize = 12;
pub const GENE_FIELD: usize = 12;
pub const TRANSCRIPT_WEIGHT: f64 = 2.0; // sense + antisense
pub const WEIGHT_TOLERANCE: f64 = 0.2;
pub const DEFAULT_MIN_EDGE_LENGTH: u64 = 1;
pub const DEFAULT_LOWER_COST_BOUND: f64 = 0.95;
pub const CHANNEL_SLOTS_PER_THREAD: usize = 4;

// file names
pub const EXPRESSION: &str = "expression.tsv";
pub const LOCI: &str = "loci.tsv";
pub const STATS: &str = "stats.json";
pub const LP_SUFFIX: &str = "lp";

// flags
pub const PAIRED_END: bool = false;
pub const STRAND_AWARE: bool = true;
pub const REQUIRE_CONTAINMENT: bool = true;

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Strand {
    Forward,
    Reverse,
}

impl Strand {
    /// +1 for forward, -1 for reverse
    pub fn sign(&self) -> i64 {
        match self {
            Strand::Forward => 1,
            Strand::Reverse => -1,
        }
    }
}

impl TryFrom<char> for Strand {
    type Error = &'static str;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c {
            '+' => Ok(Strand::Forward),
            '-' => Ok(Strand::Reverse),
            _ => Err("Strand is not + or -"),
        }
    }
}

impl std::fmt::Display for Strand {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Strand::Forward => write!(f, "+"),
            Strand::Reverse => write!(f, "-"),
        }
    }
}
