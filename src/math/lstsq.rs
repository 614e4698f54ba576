//! Least-squares transition solve via an SVD pseudo-inverse.
//!
//! We repeatedly solve problems of the form
//!
//! ```text
//! minimize ‖Y − A·X‖_F     X: k × n (regressors × samples), Y: m × n
//! ```
//!
//! With `X = U·S·Vᵀ` the minimiser is `A = Y·V·S⁻¹·Uᵀ`.
//!
//! Implementation notes:
//! - Singular values at or below a cutoff are never divided into. The default
//!   cutoff is `s_max · max(k, n) · ε` (the usual numeric-rank convention).
//!   Dropping a direction is an error unless the caller opts into a
//!   minimum-norm, rank-deficient solution.
//! - For long recordings the samples can be split into column chunks. Each
//!   chunk is factorised independently (in parallel), and the stacked
//!   `U_i·S_i` blocks are factorised again. That gives `U` and `S` of the
//!   full `X` without forming `X·Xᵀ`. Then `A = (Y·Xᵀ)·U·S⁻²·Uᵀ`. The result
//!   matches the dense path to floating tolerance.

use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Knobs for the pseudo-inverse solve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolveOptions {
    /// Relative singular-value cutoff. `None` uses `max(k, n) · ε`.
    pub rcond: Option<f64>,
    /// Return a minimum-norm solution instead of failing on rank deficiency.
    pub allow_rank_deficient: bool,
    /// Factorise in column chunks of this many samples (`None` = dense).
    pub chunk_columns: Option<usize>,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            rcond: None,
            allow_rank_deficient: false,
            chunk_columns: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PinvSolution {
    /// `m × k` operator.
    pub coefficients: DMatrix<f64>,
    /// Singular values of `X`, descending.
    pub singular_values: Vec<f64>,
    /// Number of singular values above the cutoff.
    pub design_rank: usize,
    pub cutoff: f64,
}

/// Solve `Y ≈ A·X` for `A`.
pub fn solve_transition(
    x: &DMatrix<f64>,
    y: &DMatrix<f64>,
    opts: &SolveOptions,
) -> Result<PinvSolution, AppError> {
    let (k, n) = x.shape();
    if k == 0 {
        return Err(AppError::config("Cannot solve with an empty regressor set."));
    }
    if y.ncols() != n {
        return Err(AppError::data(format!(
            "Regressor and output sample counts differ ({n} vs {}).",
            y.ncols()
        )));
    }
    if n < k {
        return Err(AppError::data(format!(
            "Insufficient samples: {n} usable samples for {k} regressors."
        )));
    }

    let chunked = opts.chunk_columns.filter(|&c| c > 0 && c < n);
    let (u, s, cross) = match chunked {
        Some(chunk) => chunked_factors(x, y, chunk)?,
        None => dense_factors(x, y)?,
    };

    let s_max = s.iter().copied().fold(0.0, f64::max);
    let rel = opts.rcond.unwrap_or(k.max(n) as f64 * f64::EPSILON);
    let cutoff = s_max * rel;
    let retained: Vec<bool> = s.iter().map(|&v| v > cutoff && v > 0.0).collect();
    let design_rank = retained.iter().filter(|r| **r).count();

    if design_rank < k && !opts.allow_rank_deficient {
        return Err(AppError::numeric(format!(
            "Design matrix is rank deficient: rank {design_rank} < {k} regressors \
             (cutoff {cutoff:.3e}, s_max {s_max:.3e})."
        )));
    }

    // `cross` is either Y·V (dense, scale by 1/s) or Y·Xᵀ·U (chunked, scale by 1/s²).
    let power = if chunked.is_some() { 2 } else { 1 };
    let mut scaled = cross;
    for (j, keep) in retained.iter().enumerate() {
        let factor = if *keep { s[j].powi(power).recip() } else { 0.0 };
        scaled.column_mut(j).scale_mut(factor);
    }
    let coefficients = scaled * u.transpose();

    if coefficients.iter().any(|v| !v.is_finite()) {
        return Err(AppError::numeric("Least-squares solve produced non-finite coefficients."));
    }

    let mut singular_values = s;
    singular_values.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

    Ok(PinvSolution {
        coefficients,
        singular_values,
        design_rank,
        cutoff,
    })
}

/// `(U, s, Y·V)` from one SVD of the full design matrix.
fn dense_factors(
    x: &DMatrix<f64>,
    y: &DMatrix<f64>,
) -> Result<(DMatrix<f64>, Vec<f64>, DMatrix<f64>), AppError> {
    let svd = x.clone().svd(true, true);
    let u = svd
        .u
        .ok_or_else(|| AppError::numeric("SVD did not produce U."))?;
    let v_t = svd
        .v_t
        .ok_or_else(|| AppError::numeric("SVD did not produce Vᵀ."))?;
    let s: Vec<f64> = svd.singular_values.iter().copied().collect();
    let yv = y * v_t.transpose();
    Ok((u, s, yv))
}

/// `(U, s, Y·Xᵀ·U)` from per-chunk factorisations.
fn chunked_factors(
    x: &DMatrix<f64>,
    y: &DMatrix<f64>,
    chunk: usize,
) -> Result<(DMatrix<f64>, Vec<f64>, DMatrix<f64>), AppError> {
    let (k, n) = x.shape();
    let starts: Vec<usize> = (0..n).step_by(chunk).collect();

    let blocks: Vec<(DMatrix<f64>, DMatrix<f64>)> = starts
        .par_iter()
        .map(|&start| {
            let len = chunk.min(n - start);
            let xc = x.columns(start, len).into_owned();
            let yc = y.columns(start, len);
            let cross = yc * xc.transpose();
            let svd = xc.svd(true, false);
            let mut us = svd.u?;
            for (j, s) in svd.singular_values.iter().enumerate() {
                us.column_mut(j).scale_mut(*s);
            }
            Some((us, cross))
        })
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| AppError::numeric("Chunk SVD did not produce U."))?;

    let width: usize = blocks.iter().map(|(us, _)| us.ncols()).sum();
    let mut stacked = DMatrix::<f64>::zeros(k, width);
    let mut col = 0;
    let mut y_xt = DMatrix::<f64>::zeros(y.nrows(), k);
    for (us, cross) in &blocks {
        stacked.columns_mut(col, us.ncols()).copy_from(us);
        col += us.ncols();
        y_xt += cross;
    }

    let svd = stacked.svd(true, false);
    let u = svd
        .u
        .ok_or_else(|| AppError::numeric("SVD did not produce U."))?;
    let s: Vec<f64> = svd.singular_values.iter().copied().collect();
    let cross = y_xt * &u;
    Ok((u, s, cross))
}

/// Numeric rank of an arbitrary matrix (`s > s_max · max(r, c) · ε`).
pub fn numeric_rank(m: &DMatrix<f64>) -> usize {
    if m.is_empty() {
        return 0;
    }
    let s = m.clone().singular_values();
    let s_max = s.iter().copied().fold(0.0, f64::max);
    let tol = s_max * m.nrows().max(m.ncols()) as f64 * f64::EPSILON;
    s.iter().filter(|&&v| v > tol).count()
}
