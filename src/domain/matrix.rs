//! Training matrix: features × time samples.
//!
//! Rows follow the `FeatureRegistry` order; columns are samples in strictly
//! increasing time. The matrix is immutable once built. Consumers that need to
//! scribble over it (the rollout simulator) take an owned copy via
//! `to_working_copy`.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Half-open column span `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingMatrix {
    data: DMatrix<f64>,
    dt: f64,
}

impl TrainingMatrix {
    /// Wrap a dense matrix. Every value must be finite.
    pub fn new(data: DMatrix<f64>, dt: f64) -> Result<Self, AppError> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(AppError::config(format!("Invalid sampling interval dt={dt}.")));
        }
        if let Some(pos) = data.iter().position(|v| !v.is_finite()) {
            let (row, col) = (pos % data.nrows().max(1), pos / data.nrows().max(1));
            return Err(AppError::data(format!(
                "Non-finite value in training matrix at row {row}, column {col}."
            )));
        }
        Ok(Self { data, dt })
    }

    /// Build from per-sample column vectors (each of length `features`).
    pub fn from_columns(features: usize, columns: &[Vec<f64>], dt: f64) -> Result<Self, AppError> {
        if let Some(bad) = columns.iter().position(|c| c.len() != features) {
            return Err(AppError::data(format!(
                "Sample {bad} has {} values, expected {features}.",
                columns[bad].len()
            )));
        }
        let data = DMatrix::from_fn(features, columns.len(), |r, c| columns[c][r]);
        Self::new(data, dt)
    }

    /// Build from row-major feature series (each of length `samples`).
    pub fn from_rows(rows: &[Vec<f64>], dt: f64) -> Result<Self, AppError> {
        let samples = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != samples) {
            return Err(AppError::data("Feature rows have unequal lengths."));
        }
        let data = DMatrix::from_fn(rows.len(), samples, |r, c| rows[r][c]);
        Self::new(data, dt)
    }

    pub fn features(&self) -> usize {
        self.data.nrows()
    }

    pub fn samples(&self) -> usize {
        self.data.ncols()
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn data(&self) -> &DMatrix<f64> {
        &self.data
    }

    pub fn value(&self, row: usize, col: usize) -> f64 {
        self.data[(row, col)]
    }

    /// Copy of one feature's time series.
    pub fn row_values(&self, row: usize) -> Vec<f64> {
        self.data.row(row).iter().copied().collect()
    }

    /// Row-major copy of the whole matrix.
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        (0..self.features()).map(|r| self.row_values(r)).collect()
    }

    /// Sub-matrix of `rows` over columns `[start, end)`.
    pub fn select(&self, rows: &[usize], start: usize, end: usize) -> DMatrix<f64> {
        let end = end.min(self.samples());
        let start = start.min(end);
        DMatrix::from_fn(rows.len(), end - start, |r, c| self.data[(rows[r], start + c)])
    }

    /// Owned copy for callers that mutate columns in place.
    pub fn to_working_copy(&self) -> DMatrix<f64> {
        self.data.clone()
    }

    /// Same features with the time axis reversed.
    pub fn reversed(&self) -> Self {
        let n = self.samples();
        let data = DMatrix::from_fn(self.features(), n, |r, c| self.data[(r, n - 1 - c)]);
        Self { data, dt: self.dt }
    }

    /// Same dimensions with every row replaced through `f(row, series)`.
    pub fn map_rows<F>(&self, mut f: F) -> Result<Self, AppError>
    where
        F: FnMut(usize, &[f64]) -> Vec<f64>,
    {
        let rows: Vec<Vec<f64>> = (0..self.features())
            .map(|r| f(r, &self.row_values(r)))
            .collect();
        if rows.is_empty() {
            return Ok(self.clone());
        }
        Self::from_rows(&rows, self.dt)
    }

    /// Drop the given column spans. Spans may overlap and come in any order;
    /// they are merged and removed from the highest index down.
    pub fn without_spans(&self, spans: &[Span]) -> Self {
        let merged = merge_spans(spans, self.samples());
        let mut data = self.data.clone();
        for span in merged.iter().rev() {
            data = data.remove_columns(span.start, span.len());
        }
        Self { data, dt: self.dt }
    }
}

/// Clamp spans to `[0, limit)`, sort them, and merge overlapping or touching ones.
pub fn merge_spans(spans: &[Span], limit: usize) -> Vec<Span> {
    let mut clamped: Vec<Span> = spans
        .iter()
        .map(|s| Span {
            start: s.start.min(limit),
            end: s.end.min(limit),
        })
        .filter(|s| !s.is_empty())
        .collect();
    clamped.sort_by_key(|s| s.start);

    let mut out: Vec<Span> = Vec::with_capacity(clamped.len());
    for span in clamped {
        match out.last_mut() {
            Some(last) if span.start <= last.end => last.end = last.end.max(span.end),
            _ => out.push(span),
        }
    }
    out
}
