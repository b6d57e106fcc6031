use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use config::{write_collection, write_descriptor, EXPRESSION, LOCI, STATS};
use serde::Serialize;

use crate::scheduler::{LocusResult, Outcome};

/// Run-wide counters shared by all workers.
#[derive(Debug, Default)]
pub struct RunStats {
    pub loci: AtomicU64,
    pub skipped: AtomicU64,
    pub trivial: AtomicU64,
    pub solved: AtomicU64,
    pub unsolved: AtomicU64,
    pub solver_calls: AtomicU64,
    pub reads: AtomicU64,
    pub reads_skipped: AtomicU64,
    pub reads_outside: AtomicU64,
    pub reads_mapped: AtomicU64,
    pub reads_unassigned: AtomicU64,
    pub inconsistent_pairs: AtomicU64,
    pub malformed_fractions: AtomicU64,
    pub weight_warnings: AtomicU64,
    pub strand_collapsed: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub loci: u64,
    pub skipped: u64,
    pub trivial: u64,
    pub solved: u64,
    pub unsolved: u64,
    pub solver_calls: u64,
    pub reads: u64,
    pub reads_skipped: u64,
    pub reads_outside: u64,
    pub reads_mapped: u64,
    pub reads_unassigned: u64,
    pub inconsistent_pairs: u64,
    pub malformed_fractions: u64,
    pub weight_warnings: u64,
    pub strand_collapsed: u64,
}

#[inline(always)]
pub fn inc(counter: &AtomicU64, count: u64) {
    counter.fetch_add(count, Ordering::Relaxed);
}

impl RunStats {
    pub fn record_outcome(&self, outcome: Outcome) {
        inc(&self.loci, 1);
        match outcome {
            Outcome::Skipped => inc(&self.skipped, 1),
            Outcome::Trivial => inc(&self.trivial, 1),
            Outcome::Solved => inc(&self.solved, 1),
            Outcome::Unsolved => inc(&self.unsolved, 1),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        StatsSnapshot {
            loci: get(&self.loci),
            skipped: get(&self.skipped),
            trivial: get(&self.trivial),
            solved: get(&self.solved),
            unsolved: get(&self.unsolved),
            solver_calls: get(&self.solver_calls),
            reads: get(&self.reads),
            reads_skipped: get(&self.reads_skipped),
            reads_outside: get(&self.reads_outside),
            reads_mapped: get(&self.reads_mapped),
            reads_unassigned: get(&self.reads_unassigned),
            inconsistent_pairs: get(&self.inconsistent_pairs),
            malformed_fractions: get(&self.malformed_fractions),
            weight_warnings: get(&self.weight_warnings),
            strand_collapsed: get(&self.strand_collapsed),
        }
    }
}

pub fn expression_lines(results: &[LocusResult]) -> Vec<String> {
    let mut lines = vec!["locus\ttranscript\tgene\tlength\texpression".to_string()];

    for result in results {
        for tx in result.transcripts.iter() {
            let value = result.expression.get(&tx.name).copied().unwrap_or(0.0);
            lines.push(format!(
                "{}\t{}\t{}\t{}\t{:.6}",
                result.locus, tx.name, tx.gene, tx.length, value
            ));
        }
    }

    lines
}

pub fn loci_lines(results: &[LocusResult]) -> Vec<String> {
    let mut lines = vec![
        "locus\tchrom\tstart\tend\tgenes\ttranscripts\toutcome\tstatus\tobjective\treads\tmapped\tunassigned"
            .to_string(),
    ];

    for r in results {
        let status = r.status.map(|s| s.to_string()).unwrap_or_else(|| ".".into());
        let objective = match (r.outcome, r.objective) {
            (Outcome::Solved, Some(obj)) => format!("{:.6}", obj),
            (Outcome::Unsolved, _) => "unsolved".into(),
            _ => ".".into(),
        };

        lines.push(format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            r.locus,
            r.chrom,
            r.signed_start,
            r.signed_end,
            r.genes,
            r.transcripts.len(),
            r.outcome,
            status,
            objective,
            r.reads,
            r.mapped,
            r.unassigned
        ));
    }

    lines
}

pub fn write_results(results: &[LocusResult], stats: &StatsSnapshot, outdir: &Path) -> Result<()> {
    std::fs::create_dir_all(outdir)?;

    write_collection(&expression_lines(results), &outdir.join(EXPRESSION))?;
    write_collection(&loci_lines(results), &outdir.join(LOCI))?;
    write_descriptor(stats, &outdir.join(STATS))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_snapshot() {
        let stats = RunStats::default();
        stats.record_outcome(Outcome::Solved);
        stats.record_outcome(Outcome::Unsolved);
        stats.record_outcome(Outcome::Unsolved);
        inc(&stats.reads, 10);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.loci, 3);
        assert_eq!(snapshot.solved, 1);
        assert_eq!(snapshot.unsolved, 2);
        assert_eq!(snapshot.reads, 10);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["unsolved"], 2);
    }
}
