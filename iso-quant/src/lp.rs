use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintOp {
    Eq,
    Le,
    Ge,
}

impl ConstraintOp {
    fn symbol(&self) -> &'static str {
        match self {
            ConstraintOp::Eq => "=",
            ConstraintOp::Le => "<=",
            ConstraintOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub terms: Vec<(usize, f64)>,
    pub op: ConstraintOp,
    pub rhs: f64,
}

/// Minimization model over non-negative variables `0..n_vars`.
#[derive(Debug, Clone, PartialEq)]
pub struct LpModel {
    pub name: String,
    pub names: Vec<String>,
    pub objective: Vec<f64>,
    pub upper: Vec<Option<f64>>,
    pub constraints: Vec<Constraint>,
}

impl LpModel {
    pub fn new(name: &str, names: Vec<String>) -> Self {
        let n = names.len();
        Self {
            name: name.to_string(),
            names,
            objective: vec![0.0; n],
            upper: vec![None; n],
            constraints: Vec::new(),
        }
    }

    pub fn n_vars(&self) -> usize {
        self.objective.len()
    }

    pub fn set_cost(&mut self, var: usize, cost: f64) {
        self.objective[var] = cost;
    }

    pub fn set_upper(&mut self, var: usize, bound: f64) {
        self.upper[var] = Some(bound);
    }

    pub fn add_constraint(&mut self, terms: Vec<(usize, f64)>, op: ConstraintOp, rhs: f64) {
        self.constraints.push(Constraint { terms, op, rhs });
    }

    /// objective value of a primal vector
    pub fn evaluate(&self, primal: &[f64]) -> f64 {
        self.objective
            .iter()
            .zip(primal)
            .map(|(c, x)| c * x)
            .sum()
    }

    /// CPLEX LP text format
    pub fn to_lp_string(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "\\ {}", self.name);
        let _ = writeln!(out, "Minimize");

        let objective: Vec<(usize, f64)> = self
            .objective
            .iter()
            .enumerate()
            .filter(|(_, c)| **c != 0.0)
            .map(|(i, c)| (i, *c))
            .collect();
        let _ = writeln!(out, " obj: {}", self.expression(&objective));

        let _ = writeln!(out, "Subject To");
        for (i, constraint) in self.constraints.iter().enumerate() {
            let _ = writeln!(
                out,
                " c{}: {} {} {}",
                i,
                self.expression(&constraint.terms),
                constraint.op.symbol(),
                constraint.rhs
            );
        }

        let _ = writeln!(out, "Bounds");
        for (i, name) in self.names.iter().enumerate() {
            match self.upper[i] {
                Some(ub) => {
                    let _ = writeln!(out, " 0 <= {} <= {}", name, ub);
                }
                None => {
                    let _ = writeln!(out, " {} >= 0", name);
                }
            }
        }
        let _ = writeln!(out, "End");

        out
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_lp_string())
            .with_context(|| format!("Cannot write LP model to {:?}", path))
    }

    fn expression(&self, terms: &[(usize, f64)]) -> String {
        if terms.is_empty() {
            return "0".to_string();
        }

        terms
            .iter()
            .map(|(var, coef)| {
                let sign = if *coef < 0.0 { "-" } else { "+" };
                format!("{} {} {}", sign, coef.abs(), self.names[*var])
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> LpModel {
        let mut lp = LpModel::new("toy", vec!["x".into(), "y".into()]);
        lp.set_cost(1, 1.0);
        lp.set_upper(1, 5.0);
        lp.add_constraint(vec![(0, 1.0), (1, -0.5)], ConstraintOp::Eq, 2.0);
        lp
    }

    #[test]
    fn test_lp_format() {
        let text = model().to_lp_string();

        assert!(text.contains("Minimize\n obj: + 1 y\n"));
        assert!(text.contains(" c0: + 1 x - 0.5 y = 2\n"));
        assert!(text.contains(" x >= 0\n"));
        assert!(text.contains(" 0 <= y <= 5\n"));
        assert!(text.ends_with("End\n"));
    }

    #[test]
    fn test_lp_evaluate() {
        assert_eq!(model().evaluate(&[3.0, 2.0]), 2.0);
    }

    #[test]
    fn test_lp_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toy.lp");
        model().write(&path).unwrap();

        assert!(std::fs::read_to_string(&path).unwrap().starts_with("\\ toy"));
    }
}
