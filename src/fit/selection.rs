//! Stepwise Regressor Selector.
//!
//! Greedy forward selection for a single target:
//!
//! 1. start from the seed regressors (normally the constant `one`)
//! 2. score every remaining candidate by fitting `included + candidate`
//! 3. move the best candidate into the included set and record a trace step
//! 4. repeat until the pool is exhausted
//!
//! Scoring rules:
//! - plain fit: RMS of the direct (open-loop) one-step residual
//! - self-referencing fit: RMS of the closed-loop rollout residual
//!
//! The target and its lags never enter the pool, except that a
//! self-referencing run seeds up to four lags and leaves deeper ones as
//! candidates.
//!
//! Candidates are scored in parallel. The minimum score wins; ties go to the
//! lowest row index so the trace is deterministic. Exhausting the pool is the
//! default stop. An optional marginal-improvement threshold can end it early.

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::{
    FeatureRegistry, FitResult, MAX_SELF_REFERENCE_LAGS, ParameterStats, SelectConfig, TrainingMatrix,
};
use crate::error::AppError;
use crate::fit::rollout::{Saturation, rollout_residuals, simulate};
use crate::fit::solver::solve;
use crate::math::lstsq::SolveOptions;
use crate::report::contrib::formula;

/// Resolved selector request (row indices, not names).
#[derive(Debug, Clone)]
pub struct SelectOptions {
    pub target: usize,
    pub seeds: Vec<usize>,
    pub exclude: Vec<usize>,
    /// `None` = every registry row.
    pub candidates: Option<Vec<usize>>,
    pub self_reference: bool,
    /// Stop once the best candidate improves the score by less than this.
    pub min_improvement: Option<f64>,
    pub solve: SolveOptions,
}

impl SelectOptions {
    pub fn from_config(
        registry: &FeatureRegistry,
        cfg: &SelectConfig,
        solve: SolveOptions,
    ) -> Result<Self, AppError> {
        Ok(Self {
            target: registry.index(&cfg.target)?,
            seeds: registry.indices(&cfg.seeds)?,
            exclude: registry.indices(&cfg.exclude)?,
            candidates: cfg
                .candidates
                .as_ref()
                .map(|c| registry.indices(c))
                .transpose()?,
            self_reference: cfg.self_reference,
            min_improvement: cfg.min_improvement,
            solve,
        })
    }
}

/// One accepted regressor.
#[derive(Debug, Clone, Serialize)]
pub struct SelectionStep {
    pub chosen: String,
    pub chosen_row: usize,
    /// Cumulative regressor names after this step.
    pub inputs: Vec<String>,
    pub rms: f64,
    pub pct_of_output_std: Option<f64>,
    pub coefficients: Vec<f64>,
    pub formula: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Exhausted,
    MarginalImprovement,
    NoValidCandidate,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectionTrace {
    pub target: String,
    /// Regressors present before the first step.
    pub initial: Vec<String>,
    /// Score of the initial set, when it can be fit on its own.
    pub initial_rms: Option<f64>,
    pub steps: Vec<SelectionStep>,
    pub stop: StopReason,
}

#[derive(Debug, Clone)]
struct Candidate {
    row: usize,
    score: f64,
    pct: Option<f64>,
    fit: FitResult,
}

pub fn select(
    matrix: &TrainingMatrix,
    registry: &FeatureRegistry,
    params: &[ParameterStats],
    opts: &SelectOptions,
) -> Result<SelectionTrace, AppError> {
    let target = opts.target;
    if target >= registry.len() || target >= matrix.features() {
        return Err(AppError::config(format!("Target row {target} is outside the registry.")));
    }
    let rows = opts.seeds.iter().chain(&opts.exclude).chain(opts.candidates.iter().flatten());
    for &row in rows {
        if row >= registry.len() || row >= matrix.features() {
            return Err(AppError::config(format!("Selector row {row} is outside the registry.")));
        }
    }

    let target_family: Vec<usize> = std::iter::once(target)
        .chain(registry.lags_of(target).into_iter().take(MAX_SELF_REFERENCE_LAGS))
        .collect();

    let mut included: Vec<usize> = Vec::new();
    for &row in &opts.seeds {
        if !included.contains(&row) {
            included.push(row);
        }
    }
    if opts.self_reference {
        for &row in &target_family {
            if !included.contains(&row) {
                included.push(row);
            }
        }
    }

    let mut pool: Vec<usize> = opts
        .candidates
        .clone()
        .unwrap_or_else(|| (0..registry.len()).collect())
        .into_iter()
        .filter(|r| !included.contains(r) && !opts.exclude.contains(r) && *r != target)
        // Self-reference keeps lags deeper than the seeded ones as candidates.
        .filter(|r| opts.self_reference || !registry.lag_info(*r).is_some_and(|(base, _)| base == target))
        .collect();
    pool.sort_unstable();
    pool.dedup();

    let initial = registry.names_of(&included);
    let saturation = Saturation::from_parameters(params, &[target])?;
    let initial_rms = if included.is_empty() {
        None
    } else {
        score(matrix, registry, &included, target, opts, &saturation)
            .map(|c| c.score)
            .ok()
    };

    let mut steps = Vec::new();
    let mut previous = initial_rms;
    let mut stop = StopReason::Exhausted;

    while !pool.is_empty() {
        let scored: Vec<Candidate> = pool
            .par_iter()
            .filter_map(|&row| {
                let mut trial = included.clone();
                trial.push(row);
                match score(matrix, registry, &trial, target, opts, &saturation) {
                    Ok(c) => Some(Candidate { row, ..c }),
                    Err(e) => {
                        debug!(candidate = registry.name(row), error = %e, "rejected candidate");
                        None
                    }
                }
            })
            .collect();

        // Deterministic selection: minimum score, ties by lowest row index.
        let Some(best) = scored.iter().reduce(|best, c| {
            if c.score < best.score || (c.score == best.score && c.row < best.row) {
                c
            } else {
                best
            }
        }) else {
            warn!(
                target = registry.name(target),
                remaining = pool.len(),
                "no candidate could be fit; stopping selection"
            );
            stop = StopReason::NoValidCandidate;
            break;
        };

        if let (Some(min), Some(prev)) = (opts.min_improvement, previous) {
            if prev - best.score < min {
                stop = StopReason::MarginalImprovement;
                break;
            }
        }

        included.push(best.row);
        pool.retain(|&r| r != best.row);
        previous = Some(best.score);

        let coefficients = best.fit.row(0);
        steps.push(SelectionStep {
            chosen: registry.name(best.row).to_string(),
            chosen_row: best.row,
            inputs: registry.names_of(&included),
            rms: best.score,
            pct_of_output_std: best.pct,
            formula: formula(registry.name(target), &coefficients, &best.fit.input_names),
            coefficients,
        });
    }

    Ok(SelectionTrace {
        target: registry.name(target).to_string(),
        initial,
        initial_rms,
        steps,
        stop,
    })
}

fn score(
    matrix: &TrainingMatrix,
    registry: &FeatureRegistry,
    inputs: &[usize],
    target: usize,
    opts: &SelectOptions,
    saturation: &Saturation,
) -> Result<Candidate, AppError> {
    let fit = solve(matrix, registry, inputs, &[target], &opts.solve)?;
    let (score, pct) = if opts.self_reference {
        let est = simulate(matrix, registry, inputs, &[target], &fit.coefficients, saturation)?;
        let r = rollout_residuals(matrix, &[target], &est, false);
        let r = r
            .first()
            .ok_or_else(|| AppError::data("Rollout produced no residuals."))?;
        (r.rms, r.pct_of_output_std)
    } else {
        (fit.residuals[0].rms, fit.residuals[0].pct_of_output_std)
    };
    if !score.is_finite() {
        return Err(AppError::numeric("Candidate score is not finite."));
    }
    Ok(Candidate {
        row: inputs.last().copied().unwrap_or(target),
        score,
        pct,
        fit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LagSpec;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::{Distribution, Normal};

    /// y[t+1] = 0.5 + 2 a[t] − b[t] + noise; c is pure noise.
    fn setup() -> (FeatureRegistry, TrainingMatrix, Vec<ParameterStats>) {
        let reg = FeatureRegistry::new(&["one", "a", "b", "c", "y"].map(String::from), &[]).unwrap();
        let n = 300;
        let mut rng = StdRng::seed_from_u64(7);
        let unit = Normal::new(0.0, 1.0).unwrap();
        let noise = Normal::new(0.0, 0.01).unwrap();
        let a: Vec<f64> = (0..n).map(|_| unit.sample(&mut rng)).collect();
        let b: Vec<f64> = (0..n).map(|_| unit.sample(&mut rng)).collect();
        let c: Vec<f64> = (0..n).map(|_| unit.sample(&mut rng)).collect();
        let mut y = vec![0.0; n];
        for t in 0..n - 1 {
            y[t + 1] = 0.5 + 2.0 * a[t] - b[t] + noise.sample(&mut rng);
        }
        let m = TrainingMatrix::from_rows(&[vec![1.0; n], a, b, c, y], 0.02).unwrap();
        let params = (0..m.features())
            .map(|r| ParameterStats::from_series(reg.name(r), &m.row_values(r)))
            .collect();
        (reg, m, params)
    }

    fn opts(target: usize) -> SelectOptions {
        SelectOptions {
            target,
            seeds: vec![0],
            exclude: vec![],
            candidates: None,
            self_reference: false,
            min_improvement: None,
            solve: SolveOptions::default(),
        }
    }

    #[test]
    fn picks_strongest_regressor_first_and_exhausts_pool() {
        let (reg, m, params) = setup();
        let trace = select(&m, &reg, &params, &opts(4)).unwrap();
        let order: Vec<&str> = trace.steps.iter().map(|s| s.chosen.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(trace.stop, StopReason::Exhausted);
        assert_eq!(trace.initial, vec!["one"]);
        assert!(trace.steps[1].rms < 0.02);
    }

    #[test]
    fn rms_trace_is_non_increasing() {
        let (reg, m, params) = setup();
        let trace = select(&m, &reg, &params, &opts(4)).unwrap();
        let mut prev = trace.initial_rms.unwrap();
        for s in &trace.steps {
            assert!(s.rms <= prev + 1e-12, "{} > {prev}", s.rms);
            prev = s.rms;
        }
    }

    #[test]
    fn min_improvement_stops_early() {
        let (reg, m, params) = setup();
        let mut o = opts(4);
        o.min_improvement = Some(1e-3);
        let trace = select(&m, &reg, &params, &o).unwrap();
        assert_eq!(trace.steps.len(), 2);
        assert_eq!(trace.stop, StopReason::MarginalImprovement);
    }

    #[test]
    fn excluded_names_never_enter() {
        let (reg, m, params) = setup();
        let mut o = opts(4);
        o.exclude = vec![1];
        let trace = select(&m, &reg, &params, &o).unwrap();
        assert!(trace.steps.iter().all(|s| s.chosen != "a"));
    }

    #[test]
    fn self_reference_seeds_target_and_lags() {
        let reg = FeatureRegistry::new(&["one", "u", "p"].map(String::from), &[LagSpec::new("p", 6)]).unwrap();
        let n = 60;
        let mut rng = StdRng::seed_from_u64(11);
        let unit = Normal::new(0.0, 1.0).unwrap();
        let u: Vec<f64> = (0..n).map(|_| unit.sample(&mut rng)).collect();
        let mut p = vec![0.0; n];
        for t in 0..n - 1 {
            p[t + 1] = 0.8 * p[t] + u[t];
        }
        let mut rows = vec![vec![1.0; n], u, p.clone()];
        for d in 1..=6 {
            rows.push((0..n).map(|t| if t >= d { p[t - d] } else { 0.0 }).collect());
        }
        let m = TrainingMatrix::from_rows(&rows, 0.1).unwrap();
        let params: Vec<ParameterStats> = (0..m.features())
            .map(|r| ParameterStats::from_series(reg.name(r), &m.row_values(r)))
            .collect();

        let mut o = opts(2);
        o.self_reference = true;
        o.candidates = Some(vec![1]);
        let trace = select(&m, &reg, &params, &o).unwrap();
        assert_eq!(trace.initial, vec!["one", "p", "p_1", "p_2", "p_3", "p_4"]);
        assert_eq!(trace.steps.len(), 1);
        assert_eq!(trace.steps[0].chosen, "u");
        assert!(trace.steps[0].rms < 1e-6, "rollout rms {}", trace.steps[0].rms);
    }

    #[test]
    fn self_reference_offers_deeper_target_lags() {
        let reg = FeatureRegistry::new(&["one", "u", "p"].map(String::from), &[LagSpec::new("p", 6)]).unwrap();
        let n = 200;
        let mut rng = StdRng::seed_from_u64(23);
        let unit = Normal::new(0.0, 1.0).unwrap();
        let u: Vec<f64> = (0..n).map(|_| unit.sample(&mut rng)).collect();
        let mut p = vec![0.0; n];
        for t in 5..n - 1 {
            p[t + 1] = 0.3 * p[t - 5] + u[t];
        }
        let mut rows = vec![vec![1.0; n], u, p.clone()];
        for d in 1..=6 {
            rows.push((0..n).map(|t| if t >= d { p[t - d] } else { 0.0 }).collect());
        }
        let m = TrainingMatrix::from_rows(&rows, 0.1).unwrap();
        let params: Vec<ParameterStats> = (0..m.features())
            .map(|r| ParameterStats::from_series(reg.name(r), &m.row_values(r)))
            .collect();

        let mut o = opts(2);
        o.self_reference = true;
        let trace = select(&m, &reg, &params, &o).unwrap();
        assert_eq!(trace.initial, vec!["one", "p", "p_1", "p_2", "p_3", "p_4"]);
        let mut chosen: Vec<&str> = trace.steps.iter().map(|s| s.chosen.as_str()).collect();
        chosen.sort_unstable();
        assert_eq!(chosen, vec!["p_5", "p_6", "u"]);

        o.self_reference = false;
        let plain = select(&m, &reg, &params, &o).unwrap();
        assert!(plain.steps.iter().all(|s| !s.chosen.starts_with("p_")));
    }

    #[test]
    fn identical_candidates_resolve_to_the_lower_row() {
        let (reg, m, params) = setup();
        let mut rows = m.to_rows();
        rows[3] = rows[2].clone();
        let m = TrainingMatrix::from_rows(&rows, 0.02).unwrap();
        let mut o = opts(4);
        o.candidates = Some(vec![3, 2]);
        let trace = select(&m, &reg, &params, &o).unwrap();
        assert_eq!(trace.steps[0].chosen, "b");
        assert_eq!(trace.steps[0].chosen_row, 2);
    }

    #[test]
    fn out_of_range_rows_are_config_errors() {
        let (reg, m, params) = setup();
        let mut o = opts(4);
        o.seeds = vec![9];
        assert_eq!(select(&m, &reg, &params, &o).unwrap_err().exit_code(), 2);

        let mut o = opts(4);
        o.exclude = vec![5];
        assert_eq!(select(&m, &reg, &params, &o).unwrap_err().exit_code(), 2);

        let mut o = opts(4);
        o.candidates = Some(vec![1, 17]);
        assert_eq!(select(&m, &reg, &params, &o).unwrap_err().exit_code(), 2);
    }
}
