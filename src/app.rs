//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - installs the tracing subscriber
//! - parses CLI arguments
//! - runs the shared pipeline for the chosen subcommand
//! - prints reports and writes artifacts/exports

use std::path::{Path, PathBuf};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, CorrelateArgs, DataArgs, FitArgs, SelectArgs, ShowArgs, SynthArgs};
use crate::data::builder::BuildOutput;
use crate::data::synthetic::{SYNTHETIC_COLUMNS, SynthConfig, generate_flight};
use crate::error::AppError;
use crate::report;

pub mod pipeline;

/// Entry point for the `sysid` binary.
pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::FitAll(args) => handle_fit_all(args),
        Command::Select(args) => handle_select(args),
        Command::Correlate(args) => handle_correlate(args),
        Command::Synth(args) => handle_synth(args),
        Command::Show(args) => handle_show(args),
    }
}

/// `RUST_LOG` wins; otherwise only warnings reach stderr.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    // A second init (e.g. from tests) is harmless.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let run = pipeline::run_fit(&args.data)?;
    print_build(&run.prepared.build, run.prepared.from_session);

    for (condition, report) in &run.reports {
        println!("{}", report::format_direct(&condition.label(), report));
    }

    crate::io::model::write_model_json(&args.write, &run.model)?;
    println!("Model written to {}", args.write.display());

    if let Some(path) = &args.export {
        let names = run.prepared.registry.names_of(&run.output_rows);
        let multi = run.reports.len() > 1;
        for (condition, report) in &run.reports {
            let Some(bin) = run
                .prepared
                .build
                .bins
                .iter()
                .find(|b| b.condition == *condition)
            else {
                continue;
            };
            let target = if multi {
                bin_export_path(path, &condition.label())
            } else {
                path.clone()
            };
            crate::io::export::write_estimates_csv(
                &target,
                &bin.matrix,
                &run.output_rows,
                &names,
                &report.estimates,
            )?;
            println!("Estimates written to {}", target.display());
        }
    }
    Ok(())
}

fn handle_fit_all(args: DataArgs) -> Result<(), AppError> {
    let (prepared, reports) = pipeline::run_fit_all(&args)?;
    print_build(&prepared.build, prepared.from_session);
    for (condition, r) in &reports {
        println!("{}", report::format_fit_all(&condition.label(), r));
    }
    Ok(())
}

fn handle_select(args: SelectArgs) -> Result<(), AppError> {
    let (prepared, traces) = pipeline::run_select(&args)?;
    print_build(&prepared.build, prepared.from_session);
    for (condition, trace) in &traces {
        println!("{}", report::format_trace(&condition.label(), trace));
    }
    Ok(())
}

fn handle_correlate(args: CorrelateArgs) -> Result<(), AppError> {
    let (prepared, pairs) = pipeline::run_correlate(&args.data)?;
    print_build(&prepared.build, prepared.from_session);
    for (condition, p) in &pairs {
        println!("{}", report::format_correlations(&condition.label(), p, args.top));
    }
    Ok(())
}

fn handle_synth(args: SynthArgs) -> Result<(), AppError> {
    let config = SynthConfig {
        samples: args.samples,
        seed: args.seed,
        noise: args.noise,
        dt: args.dt,
        flat: args.flat,
    };
    let samples = generate_flight(&config)?;
    crate::io::export::write_samples_csv(&args.out, &samples, &SYNTHETIC_COLUMNS)?;
    println!("Wrote {} samples to {}", samples.len(), args.out.display());
    Ok(())
}

fn handle_show(args: ShowArgs) -> Result<(), AppError> {
    let model = crate::io::model::read_model_json(&args.model)?;
    // Surface malformed bins (shape or missing stats) the same way a consumer would.
    crate::models::load_models(&model)?;
    println!("{}", report::format_model_file(&model));
    Ok(())
}

fn print_build(build: &BuildOutput, from_session: bool) {
    if from_session {
        println!("(bins restored from session)");
    }
    println!("{}", report::format_build_summary(build));
}

/// `estimates.csv` + `flaps=0.5` -> `estimates-flaps=0.5.csv`.
fn bin_export_path(base: &Path, label: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "estimates".to_string());
    let ext = base
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "csv".to_string());
    base.with_file_name(format!("{stem}-{label}.{ext}"))
}
