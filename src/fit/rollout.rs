//! Rollout Simulator (closed-loop, free-running validation).
//!
//! Every output that is also a regressor is fed back from the model's own
//! previous estimate instead of ground truth. Lag rows are propagated from
//! the (already overwritten) current column into the next one, so lagged
//! copies of outputs also carry the model's predictions.
//!
//! The simulator always works on a private copy of the training matrix.

use nalgebra::{DMatrix, DVector};

use crate::domain::{FeatureRegistry, ParameterStats, ResidualStats, TrainingMatrix};
use crate::error::AppError;

/// Per-output clamp applied to every estimate before it is fed back.
#[derive(Debug, Clone, PartialEq)]
pub struct Saturation {
    bounds: Vec<(f64, f64)>,
}

impl Saturation {
    /// `[min − std, max + std]` for each output row.
    pub fn from_parameters(params: &[ParameterStats], outputs: &[usize]) -> Result<Self, AppError> {
        let bounds = outputs
            .iter()
            .map(|&row| {
                params.get(row).map(ParameterStats::bounds).ok_or_else(|| {
                    AppError::config(format!("No parameter statistics for row {row}."))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { bounds })
    }

    /// No clamping (analysis and tests only).
    pub fn unbounded(outputs: usize) -> Self {
        Self {
            bounds: vec![(f64::NEG_INFINITY, f64::INFINITY); outputs],
        }
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    pub fn apply(&self, next: &mut DVector<f64>) {
        for (v, (lo, hi)) in next.iter_mut().zip(&self.bounds) {
            *v = v.clamp(*lo, *hi);
        }
    }
}

/// Run the operator closed-loop over the whole bin.
///
/// Returns a `|outputs| × T` matrix; column `i` is the estimate produced
/// from column `i`, i.e. the prediction for sample `i + 1`.
pub fn simulate(
    matrix: &TrainingMatrix,
    registry: &FeatureRegistry,
    inputs: &[usize],
    outputs: &[usize],
    a: &DMatrix<f64>,
    saturation: &Saturation,
) -> Result<DMatrix<f64>, AppError> {
    if a.shape() != (outputs.len(), inputs.len()) {
        return Err(AppError::config(format!(
            "Operator is {}×{}, expected {}×{}.",
            a.nrows(),
            a.ncols(),
            outputs.len(),
            inputs.len()
        )));
    }
    if saturation.len() != outputs.len() {
        return Err(AppError::config("Saturation bounds do not match the output set."));
    }
    if let Some(&bad) = inputs.iter().chain(outputs).find(|&&r| r >= matrix.features()) {
        return Err(AppError::config(format!("Row {bad} is outside the training matrix.")));
    }

    // (input position, output position) for every fed-back regressor.
    let feedback: Vec<(usize, usize)> = inputs
        .iter()
        .enumerate()
        .filter_map(|(ip, row)| outputs.iter().position(|o| o == row).map(|op| (ip, op)))
        .collect();

    let t = matrix.samples();
    let mut work = matrix.to_working_copy();
    let mut estimates = DMatrix::<f64>::zeros(outputs.len(), t);
    let mut next = DVector::<f64>::zeros(outputs.len());
    let links = registry.lag_links();

    for i in 0..t {
        let mut state = DVector::from_fn(inputs.len(), |r, _| work[(inputs[r], i)]);
        for &(ip, op) in &feedback {
            state[ip] = next[op];
        }

        next = a * state;
        saturation.apply(&mut next);

        if i + 1 < t {
            for link in links {
                work[(link.target, i + 1)] = work[(link.source, i)];
            }
            for (op, &row) in outputs.iter().enumerate() {
                work[(row, i + 1)] = next[op];
            }
        }
        estimates.set_column(i, &next);
    }

    Ok(estimates)
}

/// Closed-loop residual `truth[outputs, 1..] − estimate[:, ..T-1]` per output.
///
/// With `against_estimate` the percentage is relative to the std of the
/// estimate, otherwise to the std of the truth.
pub fn rollout_residuals(
    matrix: &TrainingMatrix,
    outputs: &[usize],
    estimates: &DMatrix<f64>,
    against_estimate: bool,
) -> Vec<ResidualStats> {
    let t = matrix.samples();
    if t < 2 {
        return Vec::new();
    }
    outputs
        .iter()
        .enumerate()
        .map(|(op, &row)| {
            let truth: Vec<f64> = (1..t).map(|c| matrix.value(row, c)).collect();
            let est: Vec<f64> = (0..t - 1).map(|c| estimates[(op, c)]).collect();
            let resid: Vec<f64> = truth.iter().zip(&est).map(|(a, b)| a - b).collect();
            let reference = if against_estimate { &est } else { &truth };
            ResidualStats::from_residual(&resid, reference)
        })
        .collect()
}
