//! Flat/interpolated segment excision.
//!
//! Logged accelerations that were filled in by interpolation look suspiciously
//! smooth: their deviation from a lightly smoothed trend stays tiny for a long
//! stretch. Real sensor data always carries some vibration. We flag every
//! long quiet stretch of the specific-force residual and cut it (plus a little
//! padding) out of the bin.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::matrix::{Span, TrainingMatrix, merge_spans};
use crate::domain::registry::FeatureRegistry;
use crate::error::AppError;
use crate::math::smooth::gaussian_smooth;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExcisionConfig {
    pub enabled: bool,
    /// The three orthogonal acceleration features.
    pub accel: Vec<String>,
    /// Gaussian σ in samples.
    pub sigma: f64,
    /// A sample is "quiet" when `|raw − smoothed| < threshold`.
    pub threshold: f64,
    /// Quiet runs longer than this many samples are excised.
    pub min_run: usize,
    /// Samples added on each side of a flagged run.
    pub pad: usize,
}

impl Default for ExcisionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            accel: vec!["ax".to_string(), "ay".to_string(), "az".to_string()],
            sigma: 2.0,
            threshold: 0.2,
            min_run: 25,
            pad: 5,
        }
    }
}

impl ExcisionConfig {
    pub fn validate(&self, registry: &FeatureRegistry) -> Result<(), AppError> {
        if !self.enabled {
            return Ok(());
        }
        if self.accel.is_empty() {
            return Err(AppError::config("Excision needs at least one acceleration feature."));
        }
        registry.indices(&self.accel)?;
        if !(self.sigma.is_finite() && self.sigma > 0.0) {
            return Err(AppError::config(format!("Excision sigma must be > 0 (got {}).", self.sigma)));
        }
        if !(self.threshold.is_finite() && self.threshold > 0.0) {
            return Err(AppError::config(format!(
                "Excision threshold must be > 0 (got {}).",
                self.threshold
            )));
        }
        Ok(())
    }
}

/// Euclidean norm across acceleration rows, per sample.
pub fn specific_force(matrix: &TrainingMatrix, rows: &[usize]) -> Vec<f64> {
    (0..matrix.samples())
        .map(|c| {
            rows.iter()
                .map(|&r| matrix.value(r, c).powi(2))
                .sum::<f64>()
                .sqrt()
        })
        .collect()
}

/// Padded spans of every quiet run longer than `min_run`. Spans are
/// half-open and clamped to the signal length.
pub fn find_flat_spans(signal: &[f64], cfg: &ExcisionConfig) -> Vec<Span> {
    let smooth = gaussian_smooth(signal, cfg.sigma);
    let mut spans = Vec::new();
    let mut run_start: Option<usize> = None;

    for i in 0..=signal.len() {
        let quiet = i < signal.len() && (signal[i] - smooth[i]).abs() < cfg.threshold;
        match (quiet, run_start) {
            (true, None) => run_start = Some(i),
            (false, Some(start)) => {
                if i - start > cfg.min_run {
                    spans.push(Span {
                        start: start.saturating_sub(cfg.pad),
                        end: i + cfg.pad,
                    });
                }
                run_start = None;
            }
            _ => {}
        }
    }

    merge_spans(&spans, signal.len())
}

/// Remove flat segments from a bin. Returns the trimmed matrix and the
/// (merged) spans that were removed, in original column coordinates.
pub fn excise(
    matrix: &TrainingMatrix,
    registry: &FeatureRegistry,
    cfg: &ExcisionConfig,
) -> Result<(TrainingMatrix, Vec<Span>), AppError> {
    if !cfg.enabled || matrix.samples() == 0 {
        return Ok((matrix.clone(), Vec::new()));
    }
    let rows = registry.indices(&cfg.accel)?;
    let force = specific_force(matrix, &rows);
    let spans = find_flat_spans(&force, cfg);

    if !spans.is_empty() {
        let removed: usize = spans.iter().map(Span::len).sum();
        info!(spans = spans.len(), removed, "excised flat segments");
    }

    Ok((matrix.without_spans(&spans), spans))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jittered_with_flat(n: usize, flat: std::ops::Range<usize>) -> Vec<f64> {
        (0..n)
            .map(|i| {
                if flat.contains(&i) {
                    10.0
                } else if i % 2 == 0 {
                    11.0
                } else {
                    9.0
                }
            })
            .collect()
    }

    #[test]
    fn flags_only_the_padded_flat_run() {
        let signal = jittered_with_flat(200, 80..120);
        let spans = find_flat_spans(&signal, &ExcisionConfig::default());
        assert_eq!(spans, vec![Span { start: 75, end: 125 }]);
    }

    #[test]
    fn short_quiet_runs_survive() {
        let signal = jittered_with_flat(200, 80..100);
        assert!(find_flat_spans(&signal, &ExcisionConfig::default()).is_empty());
    }

    #[test]
    fn spans_are_clamped_at_the_edges() {
        let signal = jittered_with_flat(100, 0..40);
        let spans = find_flat_spans(&signal, &ExcisionConfig::default());
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start, 0);
    }

    #[test]
    fn excise_removes_columns_from_the_matrix() {
        let registry = FeatureRegistry::new(
            &["one", "ax", "ay", "az"].map(String::from),
            &[],
        )
        .unwrap();
        let ax = jittered_with_flat(200, 80..120);
        let rows = vec![vec![1.0; 200], ax, vec![0.0; 200], vec![0.0; 200]];
        let m = TrainingMatrix::from_rows(&rows, 0.02).unwrap();
        let (out, spans) = excise(&m, &registry, &ExcisionConfig::default()).unwrap();
        assert_eq!(out.samples(), 150);
        assert_eq!(spans, vec![Span { start: 75, end: 125 }]);
    }
}
