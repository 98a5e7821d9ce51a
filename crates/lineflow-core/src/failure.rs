//! Stochastic failure model: how many items a node carries before it fails.
//!
//! A node samples a fresh [`FailureThreshold`] on setup and on every repair.
//! Each accepted arrival increments the node's item counter; reaching the
//! threshold fails the node.

use serde::{Deserialize, Serialize};

use crate::error::LineError;
use crate::rng::UniformSource;

/// Distribution of the items-to-failure threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FailureModel {
    /// Exponential inter-failure count with the given mean, floored at 1.
    /// Models a constant per-item hazard rate.
    Constant { mean: f64 },
    /// `max(min_items, round(mean + std_dev * z))` with `z` standard normal.
    Gaussian { mean: f64, std_dev: f64, min_items: u64 },
    /// Exponential inter-failure count with its own minimum floor.
    Exponential { mean: f64, min_items: u64 },
}

impl Default for FailureModel {
    /// A node that never fails.
    fn default() -> Self {
        FailureModel::Constant { mean: 0.0 }
    }
}

impl FailureModel {
    /// Reject parameters that cannot produce a threshold (NaN means, negative
    /// or non-finite standard deviations).
    pub fn validate(&self) -> Result<(), LineError> {
        let (mean, std_dev) = match *self {
            FailureModel::Constant { mean } => (mean, 0.0),
            FailureModel::Gaussian { mean, std_dev, .. } => (mean, std_dev),
            FailureModel::Exponential { mean, .. } => (mean, 0.0),
        };
        if mean.is_nan() {
            return Err(LineError::InvalidFailureModel {
                detail: "mean is NaN".into(),
            });
        }
        if !std_dev.is_finite() || std_dev < 0.0 {
            return Err(LineError::InvalidFailureModel {
                detail: format!("std_dev must be finite and non-negative, got {std_dev}"),
            });
        }
        Ok(())
    }

    fn mean(&self) -> f64 {
        match *self {
            FailureModel::Constant { mean }
            | FailureModel::Gaussian { mean, .. }
            | FailureModel::Exponential { mean, .. } => mean,
        }
    }
}

/// The sampled item count at which a node fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureThreshold {
    /// Fail once the item counter reaches this value (always >= 1).
    At(u64),
    /// The model is degenerate (mean <= 0); item counting never fails the node.
    Never,
}

impl FailureThreshold {
    /// Whether `items` accepted arrivals reach this threshold.
    pub fn is_reached(self, items: u64) -> bool {
        match self {
            FailureThreshold::At(n) => items >= n,
            FailureThreshold::Never => false,
        }
    }
}

/// Per-node sampler state: the cached second value of the last Box-Muller pair.
///
/// The cache survives node repairs; only [`FailureSampler::reseed`] clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailureSampler {
    spare: Option<f64>,
}

impl FailureSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the cached Gaussian value.
    pub fn reseed(&mut self) {
        self.spare = None;
    }

    /// Whether a Box-Muller spare is waiting to be consumed.
    pub fn has_spare(&self) -> bool {
        self.spare.is_some()
    }

    /// Draw the next items-to-failure threshold for `model`.
    pub fn sample<R: UniformSource + ?Sized>(
        &mut self,
        model: &FailureModel,
        rng: &mut R,
    ) -> FailureThreshold {
        let mean = model.mean();
        if mean.is_nan() || mean <= 0.0 {
            return FailureThreshold::Never;
        }
        let n = match *model {
            FailureModel::Constant { mean } => exponential_count(mean, rng),
            FailureModel::Exponential { mean, min_items } => {
                exponential_count(mean, rng).max(min_items)
            }
            FailureModel::Gaussian {
                mean,
                std_dev,
                min_items,
            } => {
                let z = self.standard_normal(rng);
                to_count((mean + std_dev * z).round()).max(min_items)
            }
        };
        FailureThreshold::At(n.max(1))
    }

    /// Standard normal via Box-Muller. Each pair of uniforms yields two
    /// samples; the second is cached for the next call.
    fn standard_normal<R: UniformSource + ?Sized>(&mut self, rng: &mut R) -> f64 {
        if let Some(z) = self.spare.take() {
            return z;
        }
        let u1 = rng.next_unit();
        let u2 = rng.next_unit();
        let radius = (-2.0 * u1.ln()).sqrt();
        let theta = std::f64::consts::TAU * u2;
        self.spare = Some(radius * theta.sin());
        radius * theta.cos()
    }
}

/// `round(-ln(u) * mean)` for one uniform draw.
fn exponential_count<R: UniformSource + ?Sized>(mean: f64, rng: &mut R) -> u64 {
    let u = rng.next_unit();
    to_count((-u.ln() * mean).round())
}

/// Saturating float-to-count conversion; negatives and NaN become 0.
fn to_count(v: f64) -> u64 {
    if v.is_nan() || v <= 0.0 {
        0
    } else {
        v as u64
    }
}
