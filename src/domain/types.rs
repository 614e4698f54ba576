//! Shared domain types.
//!
//! These types are kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting
//! - exported to JSON (model artifact, session cache)
//! - reloaded later by downstream consumers

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::domain::registry::LagSpec;
use crate::math::stats;

/// Default half-width for condition matching (e.g. flap setting ± 0.1).
pub const DEFAULT_CONDITION_TOLERANCE: f64 = 0.1;

/// An operating condition: samples whose `key` value lies within `tolerance`
/// of `target` belong to this bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionBin {
    pub key: String,
    pub target: f64,
    pub tolerance: f64,
}

impl ConditionBin {
    pub fn new(key: impl Into<String>, target: f64, tolerance: f64) -> Self {
        Self {
            key: key.into(),
            target,
            tolerance,
        }
    }

    /// The single bin used when no condition key is configured.
    pub fn unconditioned() -> Self {
        Self::new("", 0.0, 0.0)
    }

    pub fn is_unconditioned(&self) -> bool {
        self.key.is_empty()
    }

    pub fn matches(&self, value: f64) -> bool {
        self.is_unconditioned() || (value.is_finite() && (value - self.target).abs() < self.tolerance)
    }

    /// Short label such as `flaps=0.5`.
    pub fn label(&self) -> String {
        if self.is_unconditioned() {
            return "all".to_string();
        }
        format!("{}={}", self.key, self.target)
    }
}

/// One time step of named scalar values, as delivered by the state collaborator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sample {
    /// Seconds; optional when the caller declares `dt`.
    pub time: Option<f64>,
    pub values: HashMap<String, f64>,
}

impl Sample {
    pub fn new(time: Option<f64>) -> Self {
        Self {
            time,
            values: HashMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

/// Per-feature spread over one bin. Used only to bound rollout estimates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterStats {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub std: f64,
}

impl ParameterStats {
    pub fn from_series(name: impl Into<String>, values: &[f64]) -> Self {
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Self {
            name: name.into(),
            min: if values.is_empty() { 0.0 } else { min },
            max: if values.is_empty() { 0.0 } else { max },
            median: stats::median(values).unwrap_or(0.0),
            std: stats::std_dev(values),
        }
    }

    /// Saturation range `[min − std, max + std]`.
    pub fn bounds(&self) -> (f64, f64) {
        (self.min - self.std, self.max + self.std)
    }

    pub fn clamp(&self, value: f64) -> f64 {
        let (lo, hi) = self.bounds();
        value.clamp(lo, hi)
    }
}

/// Residual summary for one output row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResidualStats {
    pub rms: f64,
    pub mean: f64,
    pub std: f64,
    /// `100 · rms / std(output)`; `None` for a constant output.
    pub pct_of_output_std: Option<f64>,
}

impl ResidualStats {
    /// Summarise `residual` against the `truth` series it was measured on.
    pub fn from_residual(residual: &[f64], truth: &[f64]) -> Self {
        let rms = stats::rms(residual);
        let scale = stats::std_dev(truth);
        Self {
            rms,
            mean: stats::mean(residual),
            std: stats::std_dev(residual),
            pct_of_output_std: (scale > 0.0).then(|| 100.0 * rms / scale),
        }
    }
}

/// A solved operator tied to one (bin, inputs, outputs) triple.
#[derive(Debug, Clone)]
pub struct FitResult {
    pub inputs: Vec<usize>,
    pub outputs: Vec<usize>,
    pub input_names: Vec<String>,
    pub output_names: Vec<String>,
    /// `|outputs| × |inputs|`.
    pub coefficients: DMatrix<f64>,
    /// Numeric rank of `coefficients`.
    pub rank: usize,
    /// Numeric rank of the regressor block (equals `|inputs|` unless the
    /// solve was allowed to be rank deficient).
    pub design_rank: usize,
    /// Direct (open-loop) one-step residuals, one per output.
    pub residuals: Vec<ResidualStats>,
    /// Samples used by the solve (`T − 1`).
    pub samples: usize,
}

impl FitResult {
    /// Coefficient row for output position `i`.
    pub fn row(&self, i: usize) -> Vec<f64> {
        self.coefficients.row(i).iter().copied().collect()
    }
}

/// Model artifact written by `sysid fit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelFile {
    pub tool: String,
    pub generated: DateTime<Utc>,
    pub dt: f64,
    pub features: Vec<String>,
    #[serde(default)]
    pub lags: Vec<LagSpec>,
    pub bins: Vec<BinModel>,
}

/// Everything needed to reconstruct `next = A · state` for one bin and to
/// clamp its rollout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinModel {
    pub condition: ConditionBin,
    pub samples: usize,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    /// Row-major `|outputs| × |inputs|`.
    pub coefficients: Vec<Vec<f64>>,
    pub rank: usize,
    pub design_rank: usize,
    pub residuals: Vec<ResidualStats>,
    pub parameters: Vec<ParameterStats>,
}
