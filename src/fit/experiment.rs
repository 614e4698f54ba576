//! Experiment paths built on the solver.
//!
//! - `fit_direct`: fit chosen inputs → outputs, validate open and closed loop,
//!   optionally split the operator into a square control block and the rest.
//! - `fit_all`: regress on every feature at once (minus the outputs unless
//!   self-referencing).

use nalgebra::DMatrix;
use serde::Serialize;

use crate::domain::{FeatureRegistry, FitResult, ParameterStats, ResidualStats, TrainingMatrix};
use crate::error::AppError;
use crate::fit::rollout::{Saturation, rollout_residuals, simulate};
use crate::fit::solver::{direct_estimate, solve};
use crate::math::lstsq::SolveOptions;
use crate::report::contrib::{OutputContribution, analyze};

/// `A = [A_c | B]` with `A_c` square over the leading control inputs.
///
/// Control laws solve `A_c · u = y_desired − B · x` for `u`.
#[derive(Debug, Clone)]
pub struct ControlSplit {
    pub control_names: Vec<String>,
    pub state_names: Vec<String>,
    pub control_block: DMatrix<f64>,
    pub state_block: DMatrix<f64>,
    /// `None` when the control block is singular.
    pub control_inverse: Option<DMatrix<f64>>,
}

impl ControlSplit {
    pub fn new(fit: &FitResult, n: usize) -> Result<Self, AppError> {
        if n == 0 || n != fit.outputs.len() || n > fit.inputs.len() {
            return Err(AppError::config(format!(
                "Control split needs control_inputs == |outputs| ({}) and <= |inputs| ({}); got {n}.",
                fit.outputs.len(),
                fit.inputs.len()
            )));
        }
        let a = &fit.coefficients;
        let control_block = a.columns(0, n).into_owned();
        let state_block = a.columns(n, a.ncols() - n).into_owned();
        let control_inverse = control_block.clone().try_inverse();
        Ok(Self {
            control_names: fit.input_names[..n].to_vec(),
            state_names: fit.input_names[n..].to_vec(),
            control_block,
            state_block,
            control_inverse,
        })
    }

    /// Controls that drive the state `x` to `desired` in one step.
    pub fn solve_controls(&self, desired: &[f64], state: &[f64]) -> Option<Vec<f64>> {
        let inv = self.control_inverse.as_ref()?;
        if desired.len() != self.control_block.nrows() || state.len() != self.state_block.ncols() {
            return None;
        }
        let x = DMatrix::from_column_slice(state.len(), 1, state);
        let y = DMatrix::from_column_slice(desired.len(), 1, desired);
        let u = inv * (y - &self.state_block * x);
        Some(u.iter().copied().collect())
    }
}

/// Estimate series for export: column `c` predicts sample `c + 1`.
#[derive(Debug, Clone)]
pub struct Estimates {
    pub direct: DMatrix<f64>,
    pub rollout: DMatrix<f64>,
}

#[derive(Debug, Clone)]
pub struct DirectReport {
    pub fit: FitResult,
    pub rollout: Vec<ResidualStats>,
    pub contributions: Vec<OutputContribution>,
    pub control: Option<ControlSplit>,
    pub estimates: Estimates,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputSummary {
    pub output: String,
    pub direct: ResidualStats,
    pub rollout: ResidualStats,
}

#[derive(Debug, Clone)]
pub struct FitAllReport {
    pub fit: FitResult,
    /// Percentages are relative to the std of each estimate.
    pub outputs: Vec<OutputSummary>,
    pub contributions: Vec<OutputContribution>,
}

/// Fit `inputs → outputs` and validate it both ways.
pub fn fit_direct(
    matrix: &TrainingMatrix,
    registry: &FeatureRegistry,
    params: &[ParameterStats],
    inputs: &[usize],
    outputs: &[usize],
    control_inputs: usize,
    opts: &SolveOptions,
) -> Result<DirectReport, AppError> {
    let fit = solve(matrix, registry, inputs, outputs, opts)?;
    let saturation = Saturation::from_parameters(params, outputs)?;
    let rollout_est = simulate(matrix, registry, inputs, outputs, &fit.coefficients, &saturation)?;
    let rollout = rollout_residuals(matrix, outputs, &rollout_est, false);
    let contributions = analyze(&fit, matrix);
    let control = if control_inputs > 0 {
        Some(ControlSplit::new(&fit, control_inputs)?)
    } else {
        None
    };
    let estimates = Estimates {
        direct: direct_estimate(matrix, &fit),
        rollout: rollout_est,
    };

    Ok(DirectReport {
        fit,
        rollout,
        contributions,
        control,
        estimates,
    })
}

/// Regress `outputs` on every registry row (minus the outputs unless
/// `self_reference`).
pub fn fit_all(
    matrix: &TrainingMatrix,
    registry: &FeatureRegistry,
    params: &[ParameterStats],
    outputs: &[usize],
    self_reference: bool,
    opts: &SolveOptions,
) -> Result<FitAllReport, AppError> {
    let inputs: Vec<usize> = (0..registry.len())
        .filter(|r| self_reference || !outputs.contains(r))
        .collect();
    let fit = solve(matrix, registry, &inputs, outputs, opts)?;

    let direct_est = direct_estimate(matrix, &fit);
    let saturation = Saturation::from_parameters(params, outputs)?;
    let rollout_est = simulate(matrix, registry, &inputs, outputs, &fit.coefficients, &saturation)?;
    let rollout = rollout_residuals(matrix, outputs, &rollout_est, true);

    let t = matrix.samples();
    let summaries = outputs
        .iter()
        .enumerate()
        .map(|(op, &row)| {
            let truth: Vec<f64> = (1..t).map(|c| matrix.value(row, c)).collect();
            let est: Vec<f64> = direct_est.row(op).iter().copied().collect();
            let resid: Vec<f64> = truth.iter().zip(&est).map(|(a, b)| a - b).collect();
            OutputSummary {
                output: registry.name(row).to_string(),
                direct: ResidualStats::from_residual(&resid, &est),
                rollout: rollout[op],
            }
        })
        .collect();

    let contributions = analyze(&fit, matrix);
    Ok(FitAllReport {
        fit,
        outputs: summaries,
        contributions,
    })
}
