//! Constraint compiler.
//!
//! Turns the splicing graph of one locus into a linear program. The first
//! pass walks every qualifying simple edge, and from it the super-edges
//! anchored on it in the walk direction, measuring the expected share of
//! each transcript on each unit and allocating the whole index space. The
//! second pass emits the model:
//!
//! ```text
//! x(u,t) - f(u,t) * T(t) = 0                for t in signature(u)
//! sum_t x(u,t) + add(u) - sub(u) = obs(u)
//! ```
//!
//! minimizing the weighted deviation `sum c(u) * (add(u) + sub(u))`.
//! The index space is scoped to a single locus and dropped with it.

use std::sync::Arc;

use config::{TRANSCRIPT_WEIGHT, WEIGHT_TOLERANCE};
use hashbrown::HashMap;
use log::{debug, warn};
use packbed::GenePred;
use thiserror::Error;

use crate::bias::BiasOracle;
use crate::graph::{Direction, EdgeId, SplicingGraph};
use crate::lp::{ConstraintOp, LpModel};
use crate::params::QuantParams;

const FRACTION_SLACK: f64 = 1e-9;

#[derive(Debug, Error, PartialEq)]
pub enum CompileError {
    #[error("locus {0} has no transcripts")]
    NoTranscripts(String),
    #[error("locus {0} has no unit with a positive expected fraction")]
    NoUnits(String),
}

/// Walk direction; unstranded runs collapse both directions in one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pass {
    Stranded(Direction),
    Unstranded,
}

impl Pass {
    fn anchor(&self) -> Direction {
        match self {
            Pass::Stranded(d) => *d,
            Pass::Unstranded => Direction::Sense,
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            Pass::Stranded(Direction::Sense) => "s",
            Pass::Stranded(Direction::Antisense) => "a",
            Pass::Unstranded => "u",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarKey {
    Transcript(usize),
    Fraction { unit: EdgeId, pass: Pass, tx: usize },
    Add { unit: EdgeId, pass: Pass },
    Sub { unit: EdgeId, pass: Pass },
}

impl VarKey {
    fn name(&self) -> String {
        match self {
            VarKey::Transcript(t) => format!("T{}", t),
            VarKey::Fraction { unit, pass, tx } => format!("x_{}_{}_{}", unit, pass.tag(), tx),
            VarKey::Add { unit, pass } => format!("add_{}_{}", unit, pass.tag()),
            VarKey::Sub { unit, pass } => format!("sub_{}_{}", unit, pass.tag()),
        }
    }
}

/// Dense, locus-scoped variable handles.
#[derive(Debug, Default)]
pub struct IndexSpace {
    keys: Vec<VarKey>,
    lookup: HashMap<VarKey, usize>,
}

impl IndexSpace {
    /// handle of `key`, allocated on first request
    pub fn alloc(&mut self, key: VarKey) -> usize {
        if let Some(&idx) = self.lookup.get(&key) {
            return idx;
        }

        let idx = self.keys.len();
        self.keys.push(key);
        self.lookup.insert(key, idx);
        idx
    }

    pub fn get(&self, key: &VarKey) -> Option<usize> {
        self.lookup.get(key).copied()
    }

    pub fn key(&self, idx: usize) -> Option<&VarKey> {
        self.keys.get(idx)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn names(&self) -> Vec<String> {
        self.keys.iter().map(VarKey::name).collect()
    }
}

/// One edge constraint block: a unit walked in one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitPlan {
    pub unit: EdgeId,
    pub pass: Pass,
    pub observed: f64,
    pub fractions: Vec<(usize, f64)>,
}

#[derive(Debug)]
pub struct CompiledModel {
    pub lp: LpModel,
    pub space: IndexSpace,
    pub units: Vec<UnitPlan>,
    pub transcripts: Vec<Arc<GenePred>>,
    /// summed fractions per transcript
    pub weights: Vec<f64>,
    pub malformed: usize,
    pub weight_warnings: usize,
    /// stranded run fitted with one unstranded pass
    pub strand_collapsed: bool,
}

impl CompiledModel {
    pub fn transcript_var(&self, tx: usize) -> Option<usize> {
        self.space.get(&VarKey::Transcript(tx))
    }

    pub fn n_blocks(&self) -> usize {
        self.units.len()
    }
}

struct Planner<'a> {
    graph: &'a SplicingGraph,
    oracle: &'a dyn BiasOracle,
    params: &'a QuantParams,
    units: Vec<UnitPlan>,
    malformed: usize,
    collapsed: bool,
}

impl Planner<'_> {
    /// Stranded passes need reads in both directions; a locus observed on
    /// one strand only has nothing to constrain the other pass and is
    /// walked unstranded.
    fn passes(&mut self) -> Vec<Pass> {
        if !self.params.strand_aware {
            return vec![Pass::Unstranded];
        }

        let [sense, antisense] = self
            .graph
            .edges()
            .iter()
            .filter(|e| !e.is_paired_link())
            .fold([0.0, 0.0], |acc, e| [acc[0] + e.counts[0], acc[1] + e.counts[1]]);

        if (sense > 0.0) != (antisense > 0.0) {
            debug!(
                "{} sense and {} antisense reads; collapsing to one unstranded pass",
                sense, antisense
            );
            self.collapsed = true;
            return vec![Pass::Unstranded];
        }

        vec![
            Pass::Stranded(Direction::Sense),
            Pass::Stranded(Direction::Antisense),
        ]
    }

    fn run(&mut self) {
        for pass in self.passes() {
            for id in self.graph.segments() {
                let qualifies = self.params.paired_end
                    || self.graph.edge(id).length().unwrap_or(0) >= self.params.min_edge_length;

                if qualifies {
                    self.visit(id, pass);
                }
            }
        }
    }

    fn visit(&mut self, id: EdgeId, pass: Pass) {
        let graph = self.graph;
        let edge = graph.edge(id);

        // a malformed unit is dropped but its super-edges are still walked
        if let Some(fractions) = self.fractions(id, pass) {
            if fractions.iter().map(|(_, f)| f).sum::<f64>() > 0.0 {
                let observed = match pass {
                    Pass::Stranded(d) => edge.observed(Some(d)),
                    Pass::Unstranded => edge.observed(None),
                };

                self.units.push(UnitPlan {
                    unit: id,
                    pass,
                    observed,
                    fractions,
                });
            }
        }

        for &sup in edge.supers.iter() {
            let super_edge = graph.edge(sup);

            // paired links only filter inconsistent fragments
            if super_edge.is_paired_link() {
                continue;
            }

            if super_edge.anchor(pass.anchor()) == Some(id)
                && super_edge.signature.intersects(&edge.signature)
            {
                self.visit(sup, pass);
            }
        }
    }

    /// Expected share of every signature transcript on a unit; `None` when
    /// the oracle returns a malformed value.
    fn fractions(&mut self, id: EdgeId, pass: Pass) -> Option<Vec<(usize, f64)>> {
        let graph = self.graph;
        let edge = graph.edge(id);
        let read_length = graph.read_length();
        let mut fractions = Vec::with_capacity(edge.signature.len());

        for tx in edge.signature.iter() {
            let Some(window) = graph.window(id, tx, read_length) else {
                continue;
            };
            let tx_len = graph.transcripts()[tx].length();

            let directions = match pass {
                Pass::Stranded(d) => vec![d],
                Pass::Unstranded => Direction::ALL.to_vec(),
            };

            let mut total = 0.0;
            for direction in directions {
                let tx_direction = graph.transcript_direction(tx, direction);
                let f = self
                    .oracle
                    .fraction(tx_len, window, read_length, tx_direction);

                if !f.is_finite() || f < 0.0 || f > 1.0 + FRACTION_SLACK {
                    warn!(
                        "Malformed bias fraction {} for transcript {} on edge {}. Skipping edge...",
                        f,
                        graph.transcripts()[tx].name,
                        id
                    );
                    self.malformed += 1;
                    return None;
                }

                total += f.min(1.0);
            }

            fractions.push((tx, total));
        }

        Some(fractions)
    }
}

/// Compile one locus into an LP model.
pub fn compile(
    locus_id: &str,
    graph: &SplicingGraph,
    oracle: &dyn BiasOracle,
    params: &QuantParams,
) -> Result<CompiledModel, CompileError> {
    let transcripts = graph.transcripts().to_vec();
    if transcripts.is_empty() {
        return Err(CompileError::NoTranscripts(locus_id.to_string()));
    }

    // first pass: walk, measure and allocate
    let mut planner = Planner {
        graph,
        oracle,
        params,
        units: Vec::new(),
        malformed: 0,
        collapsed: false,
    };
    planner.run();
    let Planner {
        units,
        malformed,
        collapsed,
        ..
    } = planner;

    if units.is_empty() {
        return Err(CompileError::NoUnits(locus_id.to_string()));
    }

    let mut space = IndexSpace::default();
    for t in 0..transcripts.len() {
        space.alloc(VarKey::Transcript(t));
    }
    for plan in units.iter() {
        for &(tx, _) in plan.fractions.iter() {
            space.alloc(VarKey::Fraction {
                unit: plan.unit,
                pass: plan.pass,
                tx,
            });
        }
        space.alloc(VarKey::Add {
            unit: plan.unit,
            pass: plan.pass,
        });
        space.alloc(VarKey::Sub {
            unit: plan.unit,
            pass: plan.pass,
        });
    }

    // second pass: emit constraints over the fixed index space
    let mut lp = LpModel::new(locus_id, space.names());
    let mut weights = vec![0.0; transcripts.len()];
    let bounds = params.cost_bounds;

    for plan in units.iter() {
        let (unit, pass) = (plan.unit, plan.pass);
        let mut block = Vec::with_capacity(plan.fractions.len() + 2);

        for &(tx, f) in plan.fractions.iter() {
            let x = space.alloc(VarKey::Fraction { unit, pass, tx });
            let t = space.alloc(VarKey::Transcript(tx));

            lp.add_constraint(vec![(x, 1.0), (t, -f)], ConstraintOp::Eq, 0.0);
            block.push((x, 1.0));
            weights[tx] += f;
        }

        let add = space.alloc(VarKey::Add { unit, pass });
        let sub = space.alloc(VarKey::Sub { unit, pass });
        let cost = params.cost_model.cost(plan.observed);

        lp.set_cost(add, cost);
        lp.set_cost(sub, cost);
        lp.set_upper(add, bounds.lower * plan.observed);
        if let (Some(upper), true) = (bounds.upper, plan.observed > 0.0) {
            lp.set_upper(sub, upper * plan.observed);
        }

        block.push((add, 1.0));
        block.push((sub, -1.0));
        lp.add_constraint(block, ConstraintOp::Eq, plan.observed);
    }

    let mut weight_warnings = 0;
    for (tx, weight) in weights.iter().enumerate() {
        if (weight - TRANSCRIPT_WEIGHT).abs() > WEIGHT_TOLERANCE {
            warn!(
                "Transcript {} in locus {} has total weight {:.3} (expected {})",
                transcripts[tx].name, locus_id, weight, TRANSCRIPT_WEIGHT
            );
            weight_warnings += 1;
        }
    }

    debug!(
        "Locus {}: {} variables, {} constraints, {} edge blocks",
        locus_id,
        lp.n_vars(),
        lp.constraints.len(),
        units.len()
    );

    Ok(CompiledModel {
        lp,
        space,
        units,
        transcripts,
        weights,
        malformed,
        weight_warnings,
        strand_collapsed: collapsed,
    })
}
