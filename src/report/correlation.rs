//! Pearson correlation across the features of a bin.
//!
//! Informative only. A constant feature gives `NaN` and sorts after every
//! defined coefficient.

use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::Serialize;

use crate::domain::{FeatureRegistry, TrainingMatrix};
use crate::math::stats::pearson;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationPair {
    pub a: String,
    pub b: String,
    pub r: f64,
}

/// Symmetric `features × features` matrix with ones on the diagonal
/// (`NaN` on the diagonal of a constant feature).
pub fn correlation_matrix(matrix: &TrainingMatrix) -> DMatrix<f64> {
    let rows = matrix.to_rows();
    let n = rows.len();
    let upper: Vec<(usize, usize, f64)> = (0..n)
        .into_par_iter()
        .flat_map_iter(|i| {
            let rows = &rows;
            (i..n).map(move |j| (i, j, pearson(&rows[i], &rows[j])))
        })
        .collect();

    let mut out = DMatrix::from_element(n, n, f64::NAN);
    for (i, j, r) in upper {
        out[(i, j)] = r;
        out[(j, i)] = r;
    }
    out
}

/// Off-diagonal pairs ranked by `|r|`, undefined coefficients last.
pub fn ranked_pairs(registry: &FeatureRegistry, corr: &DMatrix<f64>) -> Vec<CorrelationPair> {
    let n = corr.nrows().min(registry.len());
    let mut pairs: Vec<CorrelationPair> = (0..n)
        .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
        .map(|(i, j)| CorrelationPair {
            a: registry.name(i).to_string(),
            b: registry.name(j).to_string(),
            r: corr[(i, j)],
        })
        .collect();
    pairs.sort_by(|x, y| match (x.r.is_nan(), y.r.is_nan()) {
        (false, true) => std::cmp::Ordering::Less,
        (true, false) => std::cmp::Ordering::Greater,
        _ => y
            .r
            .abs()
            .partial_cmp(&x.r.abs())
            .unwrap_or(std::cmp::Ordering::Equal),
    });
    pairs
}
