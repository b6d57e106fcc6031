//! Positional bias profiles.
//!
//! An oracle answers which share of a transcript's reads is expected to
//! start inside a window of transcript positions, and how expression of a
//! transcript of a given length is corrected for non-uniform sampling.

use std::path::Path;

use anyhow::{bail, Context, Result};
use log::info;
use packbed::par_reader;

use crate::graph::Direction;

pub trait BiasOracle: Send + Sync {
    /// Expected fraction of reads of length `read_length` from a transcript
    /// of `tx_len` bases that start in the half-open `window` (5'->3'
    /// transcript coordinates, possibly reaching outside the transcript).
    fn fraction(&self, tx_len: u64, window: (i64, i64), read_length: u64, direction: Direction)
        -> f64;

    /// Length-dependent expression correction factor.
    fn normalization_factor(&self, tx_len: u64) -> f64;
}

/// number of valid read starts and the window clipped to them
#[inline(always)]
fn clip(tx_len: u64, window: (i64, i64), read_length: u64) -> Option<(i64, i64, i64)> {
    let starts = tx_len as i64 - read_length as i64 + 1;
    if starts <= 0 {
        return None;
    }

    let lo = window.0.max(0);
    let hi = window.1.min(starts);

    (lo < hi).then_some((lo, hi, starts))
}

/// Reads start uniformly along the transcript.
#[derive(Debug, Default, Clone, Copy)]
pub struct UniformProfile;

impl BiasOracle for UniformProfile {
    fn fraction(&self, tx_len: u64, window: (i64, i64), read_length: u64, _: Direction) -> f64 {
        match clip(tx_len, window, read_length) {
            Some((lo, hi, starts)) => (hi - lo) as f64 / starts as f64,
            None => 0.0,
        }
    }

    fn normalization_factor(&self, _: u64) -> f64 {
        1.0
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ProfileClass {
    max_len: u64,
    weights: [Vec<f64>; 2],
}

impl ProfileClass {
    /// weight mass over [u0, u1) of the unit interval
    fn mass(&self, direction: Direction, u0: f64, u1: f64) -> f64 {
        let weights = &self.weights[direction.index()];
        let bins = weights.len() as f64;

        weights
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let (b0, b1) = (i as f64 / bins, (i + 1) as f64 / bins);
                let overlap = (u1.min(b1) - u0.max(b0)).max(0.0);
                w * overlap
            })
            .sum()
    }

    fn total(&self, direction: Direction) -> f64 {
        self.mass(direction, 0.0, 1.0)
    }
}

/// Piecewise-constant positional weights per transcript length class.
///
/// Table rows: `max_len<TAB>+|-<TAB>w1,w2,...`; `+` holds sense weights,
/// `-` antisense weights. A class applies to transcripts up to `max_len`
/// bases; longer transcripts use the last class.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileMatrix {
    classes: Vec<ProfileClass>,
}

impl ProfileMatrix {
    pub fn from_path<P: AsRef<Path> + std::fmt::Debug + Sync + Send>(path: P) -> Result<Self> {
        let contents = par_reader(vec![&path])?;
        let matrix =
            Self::parse(&contents).with_context(|| format!("Invalid bias profile {:?}", path))?;

        info!("Bias profile loaded: {} length classes", matrix.classes.len());
        Ok(matrix)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let mut rows: Vec<(u64, Direction, Vec<f64>)> = Vec::new();

        for (n, line) in contents.lines().enumerate() {
            if line.starts_with('#') || line.trim().is_empty() {
                continue;
            }

            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != 3 {
                bail!("line {}: expected 3 fields, found {}", n + 1, fields.len());
            }

            let max_len = fields[0]
                .parse::<u64>()
                .with_context(|| format!("line {}: bad length class", n + 1))?;
            let direction = match fields[1] {
                "+" => Direction::Sense,
                "-" => Direction::Antisense,
                other => bail!("line {}: bad direction {}", n + 1, other),
            };
            let weights = fields[2]
                .split(',')
                .filter(|w| !w.is_empty())
                .map(|w| w.trim().parse::<f64>())
                .collect::<Result<Vec<f64>, _>>()
                .with_context(|| format!("line {}: bad weights", n + 1))?;

            if weights.is_empty() || weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
                bail!("line {}: weights must be non-negative numbers", n + 1);
            }
            if weights.iter().sum::<f64>() <= 0.0 {
                bail!("line {}: weights sum to zero", n + 1);
            }

            rows.push((max_len, direction, weights));
        }

        rows.sort_by_key(|(max_len, direction, _)| (*max_len, *direction));

        let mut classes: Vec<ProfileClass> = Vec::new();
        for (max_len, direction, weights) in rows {
            match classes.last_mut() {
                Some(class) if class.max_len == max_len => {
                    class.weights[direction.index()] = weights;
                }
                _ => classes.push(ProfileClass {
                    max_len,
                    weights: [weights.clone(), weights],
                }),
            }
        }

        if classes.is_empty() {
            bail!("no length classes found");
        }

        Ok(ProfileMatrix { classes })
    }

    fn class(&self, tx_len: u64) -> &ProfileClass {
        let idx = self.classes.partition_point(|c| c.max_len < tx_len);
        &self.classes[idx.min(self.classes.len() - 1)]
    }
}

impl BiasOracle for ProfileMatrix {
    fn fraction(
        &self,
        tx_len: u64,
        window: (i64, i64),
        read_length: u64,
        direction: Direction,
    ) -> f64 {
        let Some((lo, hi, starts)) = clip(tx_len, window, read_length) else {
            return 0.0;
        };

        let class = self.class(tx_len);
        let (u0, u1) = (lo as f64 / starts as f64, hi as f64 / starts as f64);

        class.mass(direction, u0, u1) / class.total(direction)
    }

    fn normalization_factor(&self, tx_len: u64) -> f64 {
        let class = self.class(tx_len);

        Direction::ALL
            .iter()
            .map(|&d| class.weights[d.index()].len() as f64 / class.weights[d.index()].iter().sum::<f64>())
            .sum::<f64>()
            / Direction::ALL.len() as f64
    }
}
