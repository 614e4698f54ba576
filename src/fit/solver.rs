//! Least-Squares Solver.
//!
//! `solve` fits `x[t+1] ≈ A · x[t]` restricted to chosen rows:
//!
//! - `X` = input rows, columns `0 .. T-1` (drop the last sample)
//! - `Y` = output rows, columns `1 .. T` (drop the first sample)
//!
//! so column `c` of `Y` is the sample that follows column `c` of `X`.

use nalgebra::DMatrix;

use crate::domain::{FeatureRegistry, FitResult, ResidualStats, TrainingMatrix};
use crate::error::AppError;
use crate::math::lstsq::{SolveOptions, numeric_rank, solve_transition};

/// Solve for the one-step operator from `inputs` to `outputs`.
pub fn solve(
    matrix: &TrainingMatrix,
    registry: &FeatureRegistry,
    inputs: &[usize],
    outputs: &[usize],
    opts: &SolveOptions,
) -> Result<FitResult, AppError> {
    check_rows(matrix, inputs, "input")?;
    check_rows(matrix, outputs, "output")?;
    if outputs.is_empty() {
        return Err(AppError::config("Cannot solve with an empty output set."));
    }

    let t = matrix.samples();
    if t < 2 {
        return Err(AppError::data(format!(
            "Insufficient samples: {t} in bin, need at least {}.",
            inputs.len() + 1
        )));
    }

    let x = matrix.select(inputs, 0, t - 1);
    let y = matrix.select(outputs, 1, t);
    let sol = solve_transition(&x, &y, opts)?;

    let estimate = &sol.coefficients * &x;
    let residuals = (0..outputs.len())
        .map(|o| {
            let truth: Vec<f64> = y.row(o).iter().copied().collect();
            let resid: Vec<f64> = truth
                .iter()
                .zip(estimate.row(o).iter())
                .map(|(a, b)| a - b)
                .collect();
            ResidualStats::from_residual(&resid, &truth)
        })
        .collect();

    Ok(FitResult {
        inputs: inputs.to_vec(),
        outputs: outputs.to_vec(),
        input_names: registry.names_of(inputs),
        output_names: registry.names_of(outputs),
        rank: numeric_rank(&sol.coefficients),
        coefficients: sol.coefficients,
        design_rank: sol.design_rank,
        residuals,
        samples: t - 1,
    })
}

/// Open-loop estimate `A · X`, aligned with columns `1 .. T` of the outputs.
pub fn direct_estimate(matrix: &TrainingMatrix, fit: &FitResult) -> DMatrix<f64> {
    let t = matrix.samples();
    if t < 2 {
        return DMatrix::zeros(fit.outputs.len(), 0);
    }
    &fit.coefficients * matrix.select(&fit.inputs, 0, t - 1)
}

fn check_rows(matrix: &TrainingMatrix, rows: &[usize], what: &str) -> Result<(), AppError> {
    for (i, &r) in rows.iter().enumerate() {
        if r >= matrix.features() {
            return Err(AppError::config(format!(
                "{what} row {r} is outside the training matrix ({} features).",
                matrix.features()
            )));
        }
        if rows[..i].contains(&r) {
            return Err(AppError::config(format!("{what} row {r} listed more than once.")));
        }
    }
    Ok(())
}
