use std::path::PathBuf;

use clap::ValueEnum;
use config::{
    DEFAULT_LOWER_COST_BOUND, DEFAULT_MIN_EDGE_LENGTH, MIN_THREADS, PAIRED_END,
    REQUIRE_CONTAINMENT, STRAND_AWARE,
};
use serde::Serialize;

/// Penalty charged per unit of deviation from an observed count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
pub enum CostModel {
    #[default]
    Linear,
    Logarithmic,
}

impl CostModel {
    pub fn cost(&self, observed: f64) -> f64 {
        match self {
            CostModel::Linear => 1.0,
            CostModel::Logarithmic => 1.0 / (std::f64::consts::E + observed.max(0.0)).ln(),
        }
    }
}

/// `lower`: largest share of an observation the model may leave unexplained.
/// `upper`: optional cap on predicted mass beyond the observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostBounds {
    pub lower: f64,
    pub upper: Option<f64>,
}

impl Default for CostBounds {
    fn default() -> Self {
        Self {
            lower: DEFAULT_LOWER_COST_BOUND,
            upper: None,
        }
    }
}

/// Immutable run configuration shared by every unit of work.
#[derive(Debug, Clone, Serialize)]
pub struct QuantParams {
    pub paired_end: bool,
    pub strand_aware: bool,
    pub min_edge_length: u64,
    pub read_length: Option<u64>,
    pub cost_bounds: CostBounds,
    pub cost_model: CostModel,
    pub require_containment: bool,
    pub threads: usize,
    pub debug_lp: Option<PathBuf>,
}

impl Default for QuantParams {
    fn default() -> Self {
        Self {
            paired_end: PAIRED_END,
            strand_aware: STRAND_AWARE,
            min_edge_length: DEFAULT_MIN_EDGE_LENGTH,
            read_length: None,
            cost_bounds: CostBounds::default(),
            cost_model: CostModel::default(),
            require_containment: REQUIRE_CONTAINMENT,
            threads: MIN_THREADS,
            debug_lp: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_model_values() {
        assert_eq!(CostModel::Linear.cost(1000.0), 1.0);
        assert!((CostModel::Logarithmic.cost(0.0) - 1.0).abs() < 1e-12);
        assert!(CostModel::Logarithmic.cost(100.0) < CostModel::Logarithmic.cost(10.0));
    }

    #[test]
    fn test_default_params() {
        let params = QuantParams::default();

        assert!(params.strand_aware);
        assert!(!params.paired_end);
        assert_eq!(params.cost_bounds.lower, 0.95);
        assert_eq!(params.cost_bounds.upper, None);
    }
}
