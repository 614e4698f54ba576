//! Training-Matrix Builder.
//!
//! Turns an ordered stream of named samples into one immutable
//! `TrainingMatrix` per condition bin:
//!
//! 1. drop samples whose timestamp does not advance
//! 2. resolve `dt` (declared, or median timestamp step rounded to 1e-4 s)
//! 3. read every sampled feature; incomplete samples are skipped
//! 4. append lag values from the history of complete samples
//! 5. route the sample to the first bin whose condition matches
//! 6. per bin: excise flat segments, optionally low-pass, compute parameter stats
//!
//! The builder keeps no state between `build` calls.

use std::collections::VecDeque;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::data::excise::{ExcisionConfig, excise};
use crate::domain::matrix::{Span, TrainingMatrix};
use crate::domain::registry::FeatureRegistry;
use crate::domain::types::{ConditionBin, ParameterStats, Sample};
use crate::error::AppError;
use crate::math::smooth::{ButterworthLowPass, LowPassConfig};
use crate::math::stats;

/// One finished bin.
#[derive(Debug, Clone)]
pub struct BinData {
    pub condition: ConditionBin,
    pub matrix: TrainingMatrix,
    /// One entry per registry row.
    pub parameters: Vec<ParameterStats>,
    /// Removed column spans, in pre-excision coordinates.
    pub excised: Vec<Span>,
}

/// Builder output plus ingestion counters.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub dt: f64,
    pub bins: Vec<BinData>,
    pub samples_read: usize,
    /// Timestamp did not advance, or was missing in a timed recording.
    pub dropped_out_of_order: usize,
    /// A sampled feature was missing or non-finite.
    pub skipped_incomplete: usize,
    /// Complete, but not enough history for every lag yet.
    pub skipped_warmup: usize,
    /// Complete, but matched no bin (or lacked the condition value).
    pub unbinned: usize,
}

#[derive(Debug, Clone)]
pub struct TrainingMatrixBuilder<'a> {
    registry: &'a FeatureRegistry,
    bins: Vec<ConditionBin>,
    dt: Option<f64>,
    excision: ExcisionConfig,
    lowpass: Option<LowPassConfig>,
}

impl<'a> TrainingMatrixBuilder<'a> {
    /// An empty `bins` list means a single bin that accepts every sample.
    ///
    /// Flat-segment excision is opt-in here: it needs the three accelerometer
    /// features, which a bare registry may not declare. Call
    /// [`with_excision`](Self::with_excision) to enable it. The experiment
    /// file path enables it by default.
    pub fn new(registry: &'a FeatureRegistry, bins: Vec<ConditionBin>) -> Result<Self, AppError> {
        if registry.is_empty() {
            return Err(AppError::config("No features declared."));
        }
        for bin in &bins {
            if !(bin.tolerance.is_finite() && bin.tolerance > 0.0) {
                return Err(AppError::config(format!(
                    "Condition tolerance must be > 0 (bin {}).",
                    bin.label()
                )));
            }
            if !bin.target.is_finite() {
                return Err(AppError::config(format!("Non-finite condition target for `{}`.", bin.key)));
            }
        }
        Ok(Self {
            registry,
            bins,
            dt: None,
            excision: ExcisionConfig {
                enabled: false,
                ..ExcisionConfig::default()
            },
            lowpass: None,
        })
    }

    pub fn with_dt(mut self, dt: Option<f64>) -> Result<Self, AppError> {
        if let Some(v) = dt {
            if !(v.is_finite() && v > 0.0) {
                return Err(AppError::config(format!("Declared dt must be > 0 (got {v}).")));
            }
        }
        self.dt = dt;
        Ok(self)
    }

    pub fn with_excision(mut self, excision: ExcisionConfig) -> Result<Self, AppError> {
        excision.validate(self.registry)?;
        self.excision = excision;
        Ok(self)
    }

    pub fn with_lowpass(mut self, lowpass: Option<LowPassConfig>) -> Self {
        self.lowpass = lowpass;
        self
    }

    pub fn build(&self, samples: &[Sample]) -> Result<BuildOutput, AppError> {
        self.build_segments(&[samples])
    }

    /// Build from several independent recordings. Timestamp ordering and lag
    /// history restart at each segment; bin columns are appended in order.
    pub fn build_segments(&self, segments: &[&[Sample]]) -> Result<BuildOutput, AppError> {
        let mut ordered_segments = Vec::with_capacity(segments.len());
        let mut dropped_out_of_order = 0usize;
        for segment in segments {
            let (ordered, dropped) = drop_non_advancing(segment);
            dropped_out_of_order += dropped;
            ordered_segments.push(ordered);
        }
        if dropped_out_of_order > 0 {
            debug!(dropped = dropped_out_of_order, "dropped samples with non-advancing timestamps");
        }

        let dt = match self.dt {
            Some(dt) => dt,
            None => estimate_dt_segments(&ordered_segments).ok_or_else(|| {
                AppError::config("No dt declared and fewer than two timestamped samples to estimate it.")
            })?,
        };

        let unconditioned = self.bins.is_empty();
        let bin_count = if unconditioned { 1 } else { self.bins.len() };
        let mut columns: Vec<Vec<Vec<f64>>> = vec![Vec::new(); bin_count];
        let mut counts = SegmentCounts::default();
        for ordered in &ordered_segments {
            self.collect_segment(ordered, &mut columns, &mut counts);
        }
        debug!(
            skipped_incomplete = counts.incomplete,
            skipped_warmup = counts.warmup,
            unbinned = counts.unbinned,
            "sample accounting"
        );

        let conditions: Vec<ConditionBin> = if unconditioned {
            vec![ConditionBin::unconditioned()]
        } else {
            self.bins.clone()
        };

        let bins = conditions
            .into_par_iter()
            .zip(columns.into_par_iter())
            .map(|(condition, cols)| self.finish_bin(condition, &cols, dt))
            .collect::<Result<Vec<_>, AppError>>()?;

        Ok(BuildOutput {
            dt,
            bins,
            samples_read: segments.iter().map(|s| s.len()).sum(),
            dropped_out_of_order,
            skipped_incomplete: counts.incomplete,
            skipped_warmup: counts.warmup,
            unbinned: counts.unbinned,
        })
    }

    fn collect_segment(&self, ordered: &[&Sample], columns: &mut [Vec<Vec<f64>>], counts: &mut SegmentCounts) {
        let sampled = self.registry.sampled_names();
        let max_depth = self
            .registry
            .lag_specs()
            .iter()
            .map(|s| s.depth)
            .max()
            .unwrap_or(0);
        let unconditioned = self.bins.is_empty();
        // Most recent complete sample first.
        let mut history: VecDeque<Vec<f64>> = VecDeque::with_capacity(max_depth + 1);

        for sample in ordered {
            let Some(current) = read_sampled(sample, sampled) else {
                counts.incomplete += 1;
                continue;
            };

            let column = self.with_lags(&current, &history);
            let target = if unconditioned { Some(0) } else { self.route(sample) };

            match (column, target) {
                (None, _) => counts.warmup += 1,
                (Some(_), None) => counts.unbinned += 1,
                (Some(col), Some(bin)) => columns[bin].push(col),
            }

            if max_depth > 0 {
                history.push_front(current);
                history.truncate(max_depth);
            }
        }
    }

    /// Full registry column for one sample, or `None` while lag history is short.
    fn with_lags(&self, current: &[f64], history: &VecDeque<Vec<f64>>) -> Option<Vec<f64>> {
        let mut column = Vec::with_capacity(self.registry.len());
        column.extend_from_slice(current);
        for link in self.registry.lag_links() {
            let past = history.get(link.depth - 1)?;
            column.push(past[link.base]);
        }
        Some(column)
    }

    fn route(&self, sample: &Sample) -> Option<usize> {
        let key = &self.bins.first()?.key;
        let value = sample.get(key)?;
        self.bins.iter().position(|bin| bin.key == *key && bin.matches(value))
    }

    fn finish_bin(&self, condition: ConditionBin, cols: &[Vec<f64>], dt: f64) -> Result<BinData, AppError> {
        let assembled = TrainingMatrix::from_columns(self.registry.len(), cols, dt)?;
        let (mut matrix, excised) = excise(&assembled, self.registry, &self.excision)?;

        if let Some(lp) = &self.lowpass {
            if matrix.samples() > 0 {
                let filter = ButterworthLowPass::new(lp.order, lp.cutoff_hz, 1.0 / dt)?;
                matrix = matrix.map_rows(|_, series| {
                    if stats::std_dev(series) > 0.0 {
                        filter.filter(series)
                    } else {
                        series.to_vec()
                    }
                })?;
            }
        }

        let parameters = (0..matrix.features())
            .map(|r| ParameterStats::from_series(self.registry.name(r), &matrix.row_values(r)))
            .collect();

        info!(
            bin = %condition.label(),
            assembled = assembled.samples(),
            kept = matrix.samples(),
            excised_spans = excised.len(),
            "built training matrix"
        );

        Ok(BinData {
            condition,
            matrix,
            parameters,
            excised,
        })
    }
}

/// Keep samples whose timestamp strictly advances. In a timed segment a
/// sample without a timestamp cannot be ordered and is dropped; a segment with
/// no timestamps at all is kept as is.
fn drop_non_advancing(samples: &[Sample]) -> (Vec<&Sample>, usize) {
    let timed = samples.iter().any(|s| s.time.is_some());
    let mut last: Option<f64> = None;
    let mut dropped = 0usize;
    let mut out = Vec::with_capacity(samples.len());
    for s in samples {
        match (s.time, last) {
            (Some(t), Some(prev)) if !(t > prev) => dropped += 1,
            (Some(t), _) if !t.is_finite() => dropped += 1,
            (Some(t), _) => {
                last = Some(t);
                out.push(s);
            }
            (None, _) if timed => dropped += 1,
            (None, _) => out.push(s),
        }
    }
    (out, dropped)
}

#[derive(Debug, Default)]
struct SegmentCounts {
    incomplete: usize,
    warmup: usize,
    unbinned: usize,
}

/// Median timestamp step, rounded to four decimals.
pub fn estimate_dt(samples: &[&Sample]) -> Option<f64> {
    estimate_dt_segments(&[samples.to_vec()])
}

fn estimate_dt_segments(segments: &[Vec<&Sample>]) -> Option<f64> {
    let diffs: Vec<f64> = segments
        .iter()
        .flat_map(|segment| {
            let times: Vec<f64> = segment.iter().filter_map(|s| s.time).collect();
            times.windows(2).map(|w| w[1] - w[0]).collect::<Vec<_>>()
        })
        .collect();
    let dt = (stats::median(&diffs)? * 10_000.0).round() / 10_000.0;
    (dt > 0.0).then_some(dt)
}

fn read_sampled(sample: &Sample, names: &[String]) -> Option<Vec<f64>> {
    names
        .iter()
        .map(|n| sample.get(n).filter(|v| v.is_finite()))
        .collect()
}
