use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

use config::LP_SUFFIX;
use log::{debug, warn};
use minilp::{ComparisonOp, LinearExpr, OptimizationDirection, Problem};
use serde::Serialize;

use crate::lp::{ConstraintOp, LpModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SolveStatus {
    Optimal,
    Suboptimal,
    Infeasible,
    Unbounded,
    NumericFailure,
    Timeout,
    Other,
}

impl SolveStatus {
    /// OPTIMAL and SUBOPTIMAL results are trusted
    pub fn is_accepted(&self) -> bool {
        matches!(self, SolveStatus::Optimal | SolveStatus::Suboptimal)
    }
}

impl std::fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let label = match self {
            SolveStatus::Optimal => "OPTIMAL",
            SolveStatus::Suboptimal => "SUBOPTIMAL",
            SolveStatus::Infeasible => "INFEASIBLE",
            SolveStatus::Unbounded => "UNBOUNDED",
            SolveStatus::NumericFailure => "NUMERIC_FAILURE",
            SolveStatus::Timeout => "TIMEOUT",
            SolveStatus::Other => "OTHER",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolveOutcome {
    pub status: SolveStatus,
    pub objective: Option<f64>,
    /// indexed like the model variables
    pub primal: Option<Vec<f64>>,
}

impl SolveOutcome {
    pub fn failed(status: SolveStatus) -> Self {
        Self {
            status,
            objective: None,
            primal: None,
        }
    }
}

/// External LP engine seam.
pub trait LpSolver: Send + Sync {
    fn solve(&self, model: &LpModel) -> SolveOutcome;
}

/// Dense simplex backed by `minilp`. It has no time limit, so it never
/// reports TIMEOUT or SUBOPTIMAL.
#[derive(Debug, Default, Clone, Copy)]
pub struct MiniLpSolver;

impl MiniLpSolver {
    fn run(model: &LpModel) -> SolveOutcome {
        let mut problem = Problem::new(OptimizationDirection::Minimize);

        let vars: Vec<_> = model
            .objective
            .iter()
            .zip(model.upper.iter())
            .map(|(&cost, upper)| problem.add_var(cost, (0.0, upper.unwrap_or(f64::INFINITY))))
            .collect();

        for constraint in model.constraints.iter() {
            let mut expr = LinearExpr::empty();
            for &(var, coef) in constraint.terms.iter() {
                expr.add(vars[var], coef);
            }

            let op = match constraint.op {
                ConstraintOp::Eq => ComparisonOp::Eq,
                ConstraintOp::Le => ComparisonOp::Le,
                ConstraintOp::Ge => ComparisonOp::Ge,
            };
            problem.add_constraint(expr, op, constraint.rhs);
        }

        match problem.solve() {
            Ok(solution) => {
                let primal: Vec<f64> = vars.iter().map(|&var| solution[var]).collect();
                let objective = solution.objective();

                // minilp reports an open minimisation as Ok(-inf)
                if objective == f64::NEG_INFINITY || primal.iter().any(|&x| x == f64::INFINITY) {
                    return SolveOutcome::failed(SolveStatus::Unbounded);
                }

                if !objective.is_finite() || primal.iter().any(|x| !x.is_finite()) {
                    return SolveOutcome::failed(SolveStatus::NumericFailure);
                }

                SolveOutcome {
                    status: SolveStatus::Optimal,
                    objective: Some(objective),
                    primal: Some(primal),
                }
            }
            Err(minilp::Error::Infeasible) => SolveOutcome::failed(SolveStatus::Infeasible),
            Err(minilp::Error::Unbounded) => SolveOutcome::failed(SolveStatus::Unbounded),
            #[allow(unreachable_patterns)]
            Err(_) => SolveOutcome::failed(SolveStatus::Other),
        }
    }
}

impl LpSolver for MiniLpSolver {
    fn solve(&self, model: &LpModel) -> SolveOutcome {
        catch_unwind(AssertUnwindSafe(|| Self::run(model))).unwrap_or_else(|_| {
            warn!("LP engine panicked on model {}", model.name);
            SolveOutcome::failed(SolveStatus::NumericFailure)
        })
    }
}

const OBJECTIVE_TOLERANCE: f64 = 1e-6;

/// Solve a model, optionally dumping it to `<debug_dir>/<name>.lp` first.
pub fn solve_model(solver: &dyn LpSolver, model: &LpModel, debug_dir: Option<&Path>) -> SolveOutcome {
    if let Some(dir) = debug_dir {
        let name: String = model
            .name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        let path = dir.join(format!("{}.{}", name, LP_SUFFIX));

        if let Err(e) = model.write(&path) {
            warn!("{:#}", e);
        }
    }

    let mut outcome = solver.solve(model);

    if let (Some(objective), Some(primal)) = (outcome.objective, outcome.primal.as_ref()) {
        let expected = model.evaluate(primal);
        if (expected - objective).abs() > OBJECTIVE_TOLERANCE * objective.abs().max(1.0) {
            warn!(
                "Model {}: reported objective {} but primal evaluates to {}",
                model.name, objective, expected
            );
            outcome = SolveOutcome::failed(SolveStatus::NumericFailure);
        }
    }

    debug!(
        "Model {}: {} (objective {:?})",
        model.name, outcome.status, outcome.objective
    );

    outcome
}
