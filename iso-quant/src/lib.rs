//! Per-locus isoform deconvolution.
//!
//! Reference transcripts are clustered into disjoint loci; every locus gets
//! a splicing graph whose edges carry observed read counts. Expected read
//! fractions from a positional bias profile turn each graph into a linear
//! program that balances transcript abundances against the observations.
//! Solved abundances are normalized back to read units.

pub mod bias;
pub mod cli;
pub mod compiler;
pub mod core;
pub mod cursor;
pub mod graph;
pub mod lp;
pub mod normalize;
pub mod params;
pub mod scheduler;
pub mod solver;
pub mod utils;

pub use cli::Args;
pub use crate::core::quantify;
