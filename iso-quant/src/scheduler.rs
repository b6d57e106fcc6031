//! Locus scheduler.
//!
//! A single producer walks the sorted read stream, routes every read to
//! the locus owning it and emits one job per locus in genomic order. Jobs
//! travel through a bounded channel to a fixed set of workers; each job
//! owns its reads, graph and model, so no per-locus state is shared.
//! Workers only meet on the atomic counters of the run context and on the
//! result map.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use config::{get_progress_bar, CHANNEL_SLOTS_PER_THREAD};
use crossbeam_channel::{bounded, Sender};
use dashmap::DashMap;
use hashbrown::HashSet;
use log::{debug, warn};
use packbed::{GenePred, Locus, LocusIndex};
use rayon::ThreadPool;

use crate::bias::BiasOracle;
use crate::compiler::compile;
use crate::graph::SplicingGraph;
use crate::normalize::{attribute, naive_fallback, normalize, ExpressionMap};
use crate::params::QuantParams;
use crate::solver::{solve_model, LpSolver, SolveStatus};
use crate::utils::{inc, RunStats};

/// Everything a unit of work may touch besides its own job.
pub struct RunContext {
    pub params: QuantParams,
    pub oracle: Arc<dyn BiasOracle>,
    pub solver: Arc<dyn LpSolver>,
    pub stats: RunStats,
}

impl RunContext {
    pub fn new(params: QuantParams, oracle: Arc<dyn BiasOracle>, solver: Arc<dyn LpSolver>) -> Self {
        Self {
            params,
            oracle,
            solver,
            stats: RunStats::default(),
        }
    }
}

#[derive(Debug)]
pub struct LocusJob {
    pub ordinal: usize,
    pub locus: Arc<Locus>,
    pub reads: Vec<GenePred>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocusState {
    Pending,
    GraphBuilt,
    Compiled,
    Solved,
    Skipped,
    Normalized,
    Reported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// no mapped reads
    Skipped,
    /// at most one transcript, attributed directly
    Trivial,
    Solved,
    /// solver did not return an accepted status; naive estimate reported
    Unsolved,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let label = match self {
            Outcome::Skipped => "skipped",
            Outcome::Trivial => "trivial",
            Outcome::Solved => "solved",
            Outcome::Unsolved => "unsolved",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptInfo {
    pub name: String,
    pub gene: String,
    pub length: u64,
}

/// Per-locus hand-off to the writers.
#[derive(Debug, Clone, PartialEq)]
pub struct LocusResult {
    pub ordinal: usize,
    pub locus: String,
    pub chrom: String,
    pub signed_start: i64,
    pub signed_end: i64,
    pub genes: usize,
    pub transcripts: Vec<TranscriptInfo>,
    pub outcome: Outcome,
    pub status: Option<SolveStatus>,
    pub objective: Option<f64>,
    pub reads: u64,
    pub mapped: u64,
    pub unassigned: u64,
    pub expression: ExpressionMap,
}

impl LocusResult {
    fn new(job: &LocusJob) -> Self {
        let locus = &job.locus;
        let transcripts = locus
            .genes()
            .iter()
            .flat_map(|gene| {
                gene.transcripts.iter().map(move |tx| TranscriptInfo {
                    name: tx.name.clone(),
                    gene: gene.id.clone(),
                    length: tx.length(),
                })
            })
            .collect();

        Self {
            ordinal: job.ordinal,
            locus: locus.id().to_string(),
            chrom: locus.chrom().to_string(),
            signed_start: locus.signed_start(),
            signed_end: locus.signed_end(),
            genes: locus.genes().len(),
            transcripts,
            outcome: Outcome::Skipped,
            status: None,
            objective: None,
            reads: job.reads.len() as u64,
            mapped: 0,
            unassigned: 0,
            expression: ExpressionMap::new(),
        }
    }
}

struct Tracker<'a> {
    id: &'a str,
    state: LocusState,
}

impl Tracker<'_> {
    fn advance(&mut self, next: LocusState) {
        debug!("Locus {}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }
}

/// Run one locus from pending to reported.
pub fn process_locus(job: LocusJob, ctx: &RunContext) -> LocusResult {
    let mut result = LocusResult::new(&job);
    let mut tracker = Tracker {
        id: job.locus.id(),
        state: LocusState::Pending,
    };

    let outcome = run_locus(&job, ctx, &mut result, &mut tracker);
    result.outcome = outcome;
    ctx.stats.record_outcome(outcome);
    tracker.advance(LocusState::Reported);

    result
}

fn run_locus(
    job: &LocusJob,
    ctx: &RunContext,
    result: &mut LocusResult,
    tracker: &mut Tracker,
) -> Outcome {
    let params = &ctx.params;

    if job.reads.is_empty() {
        tracker.advance(LocusState::Skipped);
        return Outcome::Skipped;
    }

    let graph = SplicingGraph::build(&job.locus, &job.reads, params.read_length, params.paired_end);
    tracker.advance(LocusState::GraphBuilt);

    result.mapped = graph.mapped;
    result.unassigned = graph.unassigned;
    inc(&ctx.stats.reads_mapped, graph.mapped);
    inc(&ctx.stats.reads_unassigned, graph.unassigned);
    inc(&ctx.stats.inconsistent_pairs, graph.inconsistent);

    if graph.mapped == 0 {
        tracker.advance(LocusState::Skipped);
        return Outcome::Skipped;
    }

    if graph.transcripts().len() <= 1 {
        result.expression = attribute(graph.transcripts(), graph.mapped);
        return Outcome::Trivial;
    }

    let model = match compile(job.locus.id(), &graph, ctx.oracle.as_ref(), params) {
        Ok(model) => model,
        Err(e) => {
            warn!("{}. Falling back to naive attribution...", e);
            result.expression = naive_fallback(&graph);
            return Outcome::Unsolved;
        }
    };
    tracker.advance(LocusState::Compiled);

    inc(&ctx.stats.malformed_fractions, model.malformed as u64);
    inc(&ctx.stats.weight_warnings, model.weight_warnings as u64);
    if model.strand_collapsed {
        inc(&ctx.stats.strand_collapsed, 1);
    }
    inc(&ctx.stats.solver_calls, 1);

    let outcome = solve_model(ctx.solver.as_ref(), &model.lp, params.debug_lp.as_deref());
    result.status = Some(outcome.status);

    let primal = match (outcome.status.is_accepted(), outcome.primal) {
        (true, Some(primal)) => primal,
        _ => {
            warn!(
                "Locus {} unsolved ({}). Falling back to naive attribution...",
                job.locus.id(),
                outcome.status
            );
            result.expression = naive_fallback(&graph);
            return Outcome::Unsolved;
        }
    };
    result.objective = outcome.objective;
    tracker.advance(LocusState::Solved);

    match normalize(&primal, &model, graph.mapped, ctx.oracle.as_ref()) {
        Some(normalized) => {
            result.expression = normalized.expression;
            tracker.advance(LocusState::Normalized);
            Outcome::Solved
        }
        None => {
            warn!(
                "Locus {} solved without transcript mass. Falling back to naive attribution...",
                job.locus.id()
            );
            result.expression = naive_fallback(&graph);
            Outcome::Unsolved
        }
    }
}

/// Turns the sorted read stream into per-locus jobs in genomic order.
struct Batcher<'a> {
    index: &'a LocusIndex,
    stats: &'a RunStats,
    sender: Sender<LocusJob>,
    require_containment: bool,
    chrom: Option<String>,
    next: usize,
    batches: BTreeMap<usize, Vec<GenePred>>,
    seen: HashSet<String>,
    ordinal: usize,
}

impl Batcher<'_> {
    fn push(&mut self, read: GenePred) {
        inc(&self.stats.reads, 1);

        if self.chrom.as_deref() != Some(read.chrom.as_str()) {
            self.finish_chrom();
            self.seen.insert(read.chrom.clone());
            self.chrom = Some(read.chrom.clone());
        }

        let pos = self.index.position(
            &read.chrom,
            read.start,
            read.end,
            self.require_containment,
        );

        match pos {
            Some(pos) if pos >= self.next => {
                self.flush_until(pos);
                self.batches.entry(pos).or_default().push(read);
            }
            _ => inc(&self.stats.reads_outside, 1),
        }
    }

    /// emit every locus slot of the current chromosome before `pos`
    fn flush_until(&mut self, pos: usize) {
        let Some(chrom) = self.chrom.clone() else {
            return;
        };
        let loci = self.index.loci(&chrom);

        while self.next < pos.min(loci.len()) {
            let reads = self.batches.remove(&self.next).unwrap_or_default();
            self.emit(loci[self.next].clone(), reads);
            self.next += 1;
        }
    }

    fn finish_chrom(&mut self) {
        if let Some(chrom) = self.chrom.clone() {
            self.flush_until(self.index.loci(&chrom).len());
        }
        self.batches.clear();
        self.next = 0;
    }

    /// flush the open chromosome, then every chromosome without reads
    fn finish(mut self) {
        self.finish_chrom();

        for chrom in self.index.chroms() {
            if self.seen.contains(chrom) {
                continue;
            }
            for locus in self.index.loci(chrom) {
                self.emit(locus.clone(), Vec::new());
            }
        }
    }

    fn emit(&mut self, locus: Arc<Locus>, reads: Vec<GenePred>) {
        let job = LocusJob {
            ordinal: self.ordinal,
            locus,
            reads,
        };
        self.ordinal += 1;

        // receivers only hang up once the producer is done
        if self.sender.send(job).is_err() {
            warn!("Worker pool closed before all loci were dispatched");
        }
    }
}

/// Dispatch every locus of `index` across `pool`, fed by the sorted
/// `reads` stream. Results come back in dispatch (genomic) order.
pub fn schedule<I>(
    index: &LocusIndex,
    reads: I,
    ctx: &RunContext,
    pool: &ThreadPool,
) -> Result<Vec<LocusResult>>
where
    I: Iterator<Item = Result<GenePred>>,
{
    let workers = pool.current_num_threads().max(1);
    let (sender, receiver) = bounded::<LocusJob>(workers * CHANNEL_SLOTS_PER_THREAD);
    let results: DashMap<usize, LocusResult> = DashMap::new();
    let pb = get_progress_bar(index.len() as u64, "Quantifying loci");

    let produced = pool.in_place_scope(|scope| -> Result<()> {
        for _ in 0..workers {
            let receiver = receiver.clone();
            let (results, pb) = (&results, &pb);

            scope.spawn(move |_| {
                for job in receiver.iter() {
                    let result = process_locus(job, ctx);
                    results.insert(result.ordinal, result);
                    pb.inc(1);
                }
            });
        }
        drop(receiver);

        let mut batcher = Batcher {
            index,
            stats: &ctx.stats,
            sender,
            require_containment: ctx.params.require_containment,
            chrom: None,
            next: 0,
            batches: BTreeMap::new(),
            seen: HashSet::new(),
            ordinal: 0,
        };

        for read in reads {
            batcher.push(read?);
        }
        batcher.finish();

        Ok(())
    });

    pb.finish_and_clear();
    produced?;

    let mut results: Vec<LocusResult> = results.into_iter().map(|(_, r)| r).collect();
    results.sort_by_key(|r| r.ordinal);

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bias::UniformProfile;
    use crate::compiler::tests::{scenario_reads, unstranded, HalfOracle};
    use crate::graph::tests::{read, two_isoform_locus};
    use crate::lp::LpModel;
    use crate::solver::{MiniLpSolver, SolveOutcome};
    use config::Strand;
    use hashbrown::HashMap;
    use packbed::{cluster_genes, Gene};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSolver {
        calls: AtomicUsize,
        status: SolveStatus,
    }

    impl CountingSolver {
        fn new(status: SolveStatus) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                status,
            }
        }
    }

    impl LpSolver for CountingSolver {
        fn solve(&self, model: &LpModel) -> SolveOutcome {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.status.is_accepted() {
                MiniLpSolver.solve(model)
            } else {
                SolveOutcome::failed(self.status)
            }
        }
    }

    fn context(solver: Arc<dyn LpSolver>) -> RunContext {
        RunContext::new(unstranded(), Arc::new(HalfOracle), solver)
    }

    fn job(locus: Locus, reads: Vec<GenePred>) -> LocusJob {
        LocusJob {
            ordinal: 0,
            locus: Arc::new(locus),
            reads,
        }
    }

    fn single_locus() -> Locus {
        let tx = crate::graph::tests::tx("solo", Strand::Forward, &[(100, 200), (300, 400)]);
        cluster_genes(vec![Gene::new("S".into(), vec![tx]).unwrap()])
            .pop()
            .unwrap()
    }

    #[test]
    fn test_scenario_solved() {
        let solver = Arc::new(CountingSolver::new(SolveStatus::Optimal));
        let ctx = context(solver.clone());
        let result = process_locus(job(two_isoform_locus(), scenario_reads()), &ctx);

        assert_eq!(result.outcome, Outcome::Solved);
        assert_eq!(result.status, Some(SolveStatus::Optimal));
        assert!(result.objective.unwrap().abs() < 1e-6);
        assert!((result.expression["A"] - 100.0).abs() < 1e-6);
        assert!((result.expression["B"] - 100.0).abs() < 1e-6);
        assert_eq!(solver.calls.load(Ordering::Relaxed), 1);
        assert_eq!(ctx.stats.snapshot().solved, 1);
    }

    fn stranded() -> QuantParams {
        QuantParams {
            strand_aware: true,
            read_length: Some(1),
            ..QuantParams::default()
        }
    }

    #[test]
    fn test_stranded_solve_both_directions() {
        let ctx = RunContext::new(stranded(), Arc::new(HalfOracle), Arc::new(MiniLpSolver));

        let mut reads = Vec::new();
        for (tag, pos, n) in [("s", 1100, 50), ("a", 2100, 25), ("b", 3100, 25)] {
            for i in 0..n {
                reads.push(read(&format!("{tag}f{i}"), Strand::Forward, &[(pos, pos + 1)]));
                reads.push(read(&format!("{tag}r{i}"), Strand::Reverse, &[(pos, pos + 1)]));
            }
        }
        let result = process_locus(job(two_isoform_locus(), reads), &ctx);

        assert_eq!(result.outcome, Outcome::Solved);
        assert!(result.objective.unwrap().abs() < 1e-6);
        assert!((result.expression["A"] - 100.0).abs() < 1e-6);
        assert!((result.expression["B"] - 100.0).abs() < 1e-6);
        assert_eq!(ctx.stats.snapshot().strand_collapsed, 0);
    }

    #[test]
    fn test_stranded_one_sided_matches_unstranded() {
        let fitted = |params: QuantParams| {
            let ctx = RunContext::new(params, Arc::new(UniformProfile), Arc::new(MiniLpSolver));
            let result = process_locus(job(two_isoform_locus(), scenario_reads()), &ctx);
            (result, ctx.stats.snapshot().strand_collapsed)
        };

        let (one_sided, collapsed) = fitted(stranded());
        let (plain, _) = fitted(unstranded());

        assert_eq!(collapsed, 1);
        assert_eq!(one_sided.outcome, Outcome::Solved);
        assert_eq!(one_sided.objective, plain.objective);
        for name in ["A", "B"] {
            assert!((one_sided.expression[name] - plain.expression[name]).abs() < 1e-9);
        }
        assert!(one_sided.expression["A"] > one_sided.expression["B"]);
        assert!((one_sided.expression["A"] + one_sided.expression["B"] - 200.0).abs() < 1e-6);
    }

    #[test]
    fn test_single_transcript_bypasses_solver() {
        let solver = Arc::new(CountingSolver::new(SolveStatus::Optimal));
        let ctx = context(solver.clone());
        let reads = vec![
            read("r1", Strand::Forward, &[(120, 121)]),
            read("r2", Strand::Forward, &[(350, 351)]),
            read("r3", Strand::Reverse, &[(150, 151)]),
        ];
        let result = process_locus(job(single_locus(), reads), &ctx);

        assert_eq!(result.outcome, Outcome::Trivial);
        assert_eq!(result.expression["solo"], 6.0);
        assert_eq!(solver.calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_zero_reads_skipped() {
        let solver = Arc::new(CountingSolver::new(SolveStatus::Optimal));
        let ctx = context(solver.clone());
        let result = process_locus(job(two_isoform_locus(), Vec::new()), &ctx);

        assert_eq!(result.outcome, Outcome::Skipped);
        assert!(result.expression.is_empty());
        assert_eq!(solver.calls.load(Ordering::Relaxed), 0);
        assert_eq!(ctx.stats.snapshot().skipped, 1);
    }

    #[test]
    fn test_unassignable_reads_skipped() {
        let ctx = context(Arc::new(MiniLpSolver));
        let reads = vec![read("r1", Strand::Forward, &[(1600, 1700)])];
        let result = process_locus(job(two_isoform_locus(), reads), &ctx);

        assert_eq!(result.outcome, Outcome::Skipped);
        assert_eq!((result.reads, result.mapped, result.unassigned), (1, 0, 1));
    }

    #[test]
    fn test_infeasible_falls_back() {
        let solver = Arc::new(CountingSolver::new(SolveStatus::Infeasible));
        let ctx = context(solver.clone());
        let result = process_locus(job(two_isoform_locus(), scenario_reads()), &ctx);

        assert_eq!(result.outcome, Outcome::Unsolved);
        assert_eq!(result.status, Some(SolveStatus::Infeasible));
        assert_eq!(result.objective, None);
        assert!(!result.expression.is_empty());
        assert_eq!(result.expression["A"], 200.0);
        assert_eq!(ctx.stats.snapshot().unsolved, 1);
    }

    fn index() -> LocusIndex {
        let far = crate::graph::tests::tx("far", Strand::Reverse, &[(10_000, 11_000)]);
        let far = cluster_genes(vec![Gene::new("F".into(), vec![far]).unwrap()])
            .pop()
            .unwrap();
        let other = crate::graph::tests::tx("other", Strand::Forward, &[(0, 500)]);
        let mut other = cluster_genes(vec![Gene::new("O".into(), vec![other]).unwrap()])
            .pop()
            .unwrap();
        if let Locus::Gene(gene) = &mut other {
            gene.chrom = "chr2".into();
        }

        let mut map = HashMap::new();
        map.insert("chr1".to_string(), vec![far, two_isoform_locus()]);
        map.insert("chr2".to_string(), vec![other]);
        LocusIndex::new(map).unwrap()
    }

    #[test]
    fn test_schedule_genomic_order() {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(3).build().unwrap();
        let ctx = RunContext::new(unstranded(), Arc::new(UniformProfile), Arc::new(MiniLpSolver));

        let mut reads = scenario_reads();
        reads.insert(0, read("out", Strand::Forward, &[(10, 11)]));
        reads.push(read("gap", Strand::Forward, &[(5000, 5001)]));
        reads.push(read("f1", Strand::Reverse, &[(10_500, 10_501)]));

        let results = schedule(&index(), reads.into_iter().map(Ok), &ctx, &pool).unwrap();
        let order: Vec<&str> = results.iter().map(|r| r.locus.as_str()).collect();

        assert_eq!(order, vec!["G", "F", "O"]);
        assert_eq!(results[0].outcome, Outcome::Solved);
        assert_eq!(results[1].outcome, Outcome::Trivial);
        assert_eq!(results[2].outcome, Outcome::Skipped);

        let stats = ctx.stats.snapshot();
        assert_eq!(stats.reads, 203);
        assert_eq!(stats.reads_outside, 2);
        assert_eq!(stats.loci, 3);
    }

    #[test]
    fn test_schedule_propagates_unsorted_input() {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let ctx = context(Arc::new(MiniLpSolver));
        let reads = vec![
            Ok(read("r1", Strand::Forward, &[(1100, 1101)])),
            Err(anyhow::anyhow!("Unsorted reads")),
        ];

        assert!(schedule(&index(), reads.into_iter(), &ctx, &pool).is_err());
    }
}
