//! Result normalization.
//!
//! Solved transcript variables are divided by the theoretical transcript
//! weight, scaled so the locus total equals its mapped-read count, and
//! corrected by the length-dependent factor of the bias profile. Loci that
//! never reach the solver are attributed directly in read units.

use std::collections::BTreeMap;
use std::sync::Arc;

use config::TRANSCRIPT_WEIGHT;
use packbed::GenePred;

use crate::bias::BiasOracle;
use crate::compiler::CompiledModel;
use crate::graph::SplicingGraph;

pub type ExpressionMap = BTreeMap<String, f64>;

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    /// mass-conserving values, before the length-bias factor
    pub conserved: Vec<f64>,
    pub expression: ExpressionMap,
}

/// `None` when the solution assigns no mass to any transcript.
pub fn normalize(
    primal: &[f64],
    model: &CompiledModel,
    mapped: u64,
    oracle: &dyn BiasOracle,
) -> Option<Normalized> {
    let raw: Vec<f64> = (0..model.transcripts.len())
        .map(|tx| {
            model
                .transcript_var(tx)
                .and_then(|var| primal.get(var))
                .copied()
                .unwrap_or(0.0)
                .max(0.0)
                / TRANSCRIPT_WEIGHT
        })
        .collect();

    let total: f64 = raw.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return None;
    }

    let scale = mapped as f64 / total;
    let conserved: Vec<f64> = raw.iter().map(|v| v * scale).collect();

    let expression = model
        .transcripts
        .iter()
        .zip(conserved.iter())
        .map(|(tx, v)| (tx.name.clone(), v * oracle.normalization_factor(tx.length())))
        .collect();

    Some(Normalized {
        conserved,
        expression,
    })
}

/// Direct attribution for loci without a model.
pub fn attribute(transcripts: &[Arc<GenePred>], mapped: u64) -> ExpressionMap {
    transcripts
        .iter()
        .map(|tx| (tx.name.clone(), TRANSCRIPT_WEIGHT * mapped as f64))
        .collect()
}

/// Split every observed unit evenly over its signature, in the same read
/// units as direct attribution.
pub fn naive_fallback(graph: &SplicingGraph) -> ExpressionMap {
    let mut acc = vec![0.0; graph.transcripts().len()];

    for edge in graph.edges().iter().filter(|e| !e.is_paired_link()) {
        let observed = edge.observed(None);
        let members = edge.signature.len();

        if observed <= 0.0 || members == 0 {
            continue;
        }

        let share = observed / members as f64;
        for tx in edge.signature.iter() {
            acc[tx] += share;
        }
    }

    graph
        .transcripts()
        .iter()
        .zip(acc)
        .map(|(tx, v)| (tx.name.clone(), TRANSCRIPT_WEIGHT * v))
        .collect()
}
