//! Shared pipeline logic used by every data-driven subcommand.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! experiment file -> registry -> ingest (or session) -> bins -> per-bin fits
//!
//! The app layer then only decides what to print and what to write.

use rayon::prelude::*;
use tracing::{info, warn};

use crate::cli::{DataArgs, SelectArgs};
use crate::data::builder::{BinData, BuildOutput, TrainingMatrixBuilder};
use crate::domain::{BinModel, ConditionBin, ExperimentConfig, FeatureRegistry, ModelFile, SelectConfig};
use crate::error::{AppError, EXIT_DATA};
use crate::fit::experiment::{DirectReport, FitAllReport, fit_all, fit_direct};
use crate::fit::selection::{SelectOptions, SelectionTrace, select};
use crate::io::ingest::load_logs;
use crate::io::model::{bin_model, model_file};
use crate::io::session::{SessionKey, load_session, save_session};
use crate::report::correlation::{CorrelationPair, correlation_matrix, ranked_pairs};

/// Experiment, registry and built bins of one run.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub config: ExperimentConfig,
    pub registry: FeatureRegistry,
    pub build: BuildOutput,
    pub from_session: bool,
}

/// Per-bin results, in bin order. Bins without enough data are left out.
pub type BinResults<T> = Vec<(ConditionBin, T)>;

#[derive(Debug, Clone)]
pub struct FitRun {
    pub prepared: PreparedRun,
    pub output_rows: Vec<usize>,
    pub reports: BinResults<DirectReport>,
    pub model: ModelFile,
}

/// Load the experiment and build (or restore) every bin.
pub fn prepare(args: &DataArgs) -> Result<PreparedRun, AppError> {
    let config = ExperimentConfig::load(&args.config)?;
    let registry = config.registry()?;
    config.validate(&registry)?;

    let key = SessionKey::new(&args.data, &config)?;
    let cached = args.session.as_deref().and_then(|path| load_session(path, &key));
    let from_session = cached.is_some();

    let mut build = match cached {
        Some(build) => build,
        None => {
            let ingest = load_logs(&args.data, registry.sampled_names())?;
            let build = TrainingMatrixBuilder::new(&registry, config.condition_bins()?)?
                .with_dt(config.dt)?
                .with_excision(config.excision.clone())?
                .with_lowpass(config.lowpass)
                .build_segments(&ingest.segments())?;
            if let Some(path) = &args.session {
                if let Err(e) = save_session(path, &key, &build) {
                    warn!(path = %path.display(), error = %e, "could not save session");
                }
            }
            build
        }
    };

    if config.reverse_time {
        info!("fitting on time-reversed bins");
        for bin in &mut build.bins {
            bin.matrix = bin.matrix.reversed();
        }
    }

    Ok(PreparedRun {
        config,
        registry,
        build,
        from_session,
    })
}

/// Run `f` on every bin in parallel.
///
/// Insufficient-data failures drop that bin with a warning; any other
/// failure aborts the run. At least one bin must succeed.
pub fn for_each_bin<T, F>(bins: &[BinData], f: F) -> Result<BinResults<T>, AppError>
where
    T: Send,
    F: Fn(&BinData) -> Result<T, AppError> + Sync,
{
    let results: Vec<Result<T, AppError>> = bins.par_iter().map(&f).collect();

    let mut out = Vec::with_capacity(bins.len());
    for (bin, result) in bins.iter().zip(results) {
        match result {
            Ok(v) => out.push((bin.condition.clone(), v)),
            Err(e) if e.exit_code() == EXIT_DATA => {
                warn!(bin = %bin.condition.label(), samples = bin.matrix.samples(), error = %e, "skipping bin");
            }
            Err(e) => return Err(e),
        }
    }
    if out.is_empty() {
        return Err(AppError::data("No condition bin has enough data to fit."));
    }
    Ok(out)
}

pub fn run_fit(args: &DataArgs) -> Result<FitRun, AppError> {
    let prepared = prepare(args)?;
    let PreparedRun { config, registry, build, .. } = &prepared;

    let outputs = output_rows(config, registry)?;
    let inputs = config.resolved_inputs(registry)?;

    let fitted: BinResults<(DirectReport, BinModel)> = for_each_bin(&build.bins, |bin| {
        let report = fit_direct(
            &bin.matrix,
            registry,
            &bin.parameters,
            &inputs,
            &outputs,
            config.control_inputs,
            &config.solver,
        )?;
        let model = bin_model(&bin.condition, &report.fit, &bin.parameters);
        Ok((report, model))
    })?;

    let (reports, models): (BinResults<DirectReport>, Vec<BinModel>) = fitted
        .into_iter()
        .map(|(condition, (report, model))| ((condition, report), model))
        .unzip();
    let model = model_file(registry, build.dt, models);

    Ok(FitRun {
        output_rows: outputs,
        reports,
        model,
        prepared,
    })
}

pub fn run_fit_all(args: &DataArgs) -> Result<(PreparedRun, BinResults<FitAllReport>), AppError> {
    let prepared = prepare(args)?;
    let outputs = output_rows(&prepared.config, &prepared.registry)?;
    let reports = for_each_bin(&prepared.build.bins, |bin| {
        fit_all(
            &bin.matrix,
            &prepared.registry,
            &bin.parameters,
            &outputs,
            prepared.config.self_reference,
            &prepared.config.solver,
        )
    })?;
    Ok((prepared, reports))
}

pub fn run_select(args: &SelectArgs) -> Result<(PreparedRun, BinResults<SelectionTrace>), AppError> {
    let prepared = prepare(&args.data)?;
    let select_cfg = selection_config(&prepared.config, args)?;
    let opts = SelectOptions::from_config(&prepared.registry, &select_cfg, prepared.config.solver)?;

    let traces = for_each_bin(&prepared.build.bins, |bin| {
        select(&bin.matrix, &prepared.registry, &bin.parameters, &opts)
    })?;
    Ok((prepared, traces))
}

pub fn run_correlate(args: &DataArgs) -> Result<(PreparedRun, BinResults<Vec<CorrelationPair>>), AppError> {
    let prepared = prepare(args)?;
    let pairs = for_each_bin(&prepared.build.bins, |bin| {
        if bin.matrix.samples() < 2 {
            return Err(AppError::data(format!(
                "Bin {} has fewer than two samples.",
                bin.condition.label()
            )));
        }
        Ok(ranked_pairs(&prepared.registry, &correlation_matrix(&bin.matrix)))
    })?;
    Ok((prepared, pairs))
}

/// Experiment `select` section with command-line overrides applied.
pub fn selection_config(config: &ExperimentConfig, args: &SelectArgs) -> Result<SelectConfig, AppError> {
    let mut cfg = match (&config.select, &args.target) {
        (Some(cfg), _) => cfg.clone(),
        (None, Some(target)) => SelectConfig {
            target: target.clone(),
            seeds: vec![crate::io::ingest::BIAS_FEATURE.to_string()],
            exclude: Vec::new(),
            candidates: None,
            self_reference: false,
            min_improvement: None,
        },
        (None, None) => {
            return Err(AppError::config(
                "No selection target: add a `select` section or pass --target.",
            ));
        }
    };
    if let Some(target) = &args.target {
        cfg.target = target.clone();
    }
    if args.self_reference {
        cfg.self_reference = true;
    }
    if let Some(m) = args.min_improvement {
        if !(m.is_finite() && m >= 0.0) {
            return Err(AppError::config(format!("--min-improvement must be >= 0 (got {m}).")));
        }
        cfg.min_improvement = Some(m);
    }
    Ok(cfg)
}

fn output_rows(config: &ExperimentConfig, registry: &FeatureRegistry) -> Result<Vec<usize>, AppError> {
    if config.outputs.is_empty() {
        return Err(AppError::config("The experiment declares no outputs."));
    }
    registry.indices(&config.outputs)
}
