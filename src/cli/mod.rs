//! Command-line parsing for the flight system-identification tool.
//!
//! Argument parsing and command dispatch stay separate from the math. The
//! declarative part of a run (features, lags, bins, outputs) lives in the
//! experiment JSON passed with `--config`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "sysid", version, about = "Linear state-transition identification from flight logs")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Direct fit + rollout for every bin; writes the model artifact.
    Fit(FitArgs),
    /// Regress the outputs on every declared feature at once.
    FitAll(DataArgs),
    /// Greedy forward selection of regressors for one target.
    Select(SelectArgs),
    /// Rank feature pairs by Pearson correlation.
    Correlate(CorrelateArgs),
    /// Write a seeded synthetic flight log.
    Synth(SynthArgs),
    /// Print a saved model artifact.
    Show(ShowArgs),
}

/// Inputs shared by every command that builds training matrices.
#[derive(Debug, Args, Clone)]
pub struct DataArgs {
    /// Flight-log CSV files; each file is an independent recording.
    #[arg(long = "data", value_name = "CSV", required = true, num_args = 1..)]
    pub data: Vec<PathBuf>,

    /// Experiment JSON.
    #[arg(long, value_name = "JSON")]
    pub config: PathBuf,

    /// Reuse (or create) a cache of the built bins.
    #[arg(long, value_name = "JSON")]
    pub session: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    #[command(flatten)]
    pub data: DataArgs,

    /// Model artifact to write.
    #[arg(long, value_name = "JSON")]
    pub write: PathBuf,

    /// Export truth/direct/rollout series per bin (`<stem>-<bin>.csv`).
    #[arg(long, value_name = "CSV")]
    pub export: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct SelectArgs {
    #[command(flatten)]
    pub data: DataArgs,

    /// Override the selection target.
    #[arg(long)]
    pub target: Option<String>,

    /// Seed with the target and its first lags; deeper lags stay candidates.
    #[arg(long)]
    pub self_reference: bool,

    /// Stop once the best candidate improves RMS by less than this.
    #[arg(long)]
    pub min_improvement: Option<f64>,
}

#[derive(Debug, Args, Clone)]
pub struct CorrelateArgs {
    #[command(flatten)]
    pub data: DataArgs,

    /// Pairs to list per bin.
    #[arg(long, default_value_t = 20)]
    pub top: usize,
}

#[derive(Debug, Args, Clone)]
pub struct SynthArgs {
    /// Output CSV.
    #[arg(long, value_name = "CSV")]
    pub out: PathBuf,

    #[arg(short = 'n', long, default_value_t = 3000)]
    pub samples: usize,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Noise standard deviation.
    #[arg(long, default_value_t = 0.01)]
    pub noise: f64,

    /// Sampling interval (seconds).
    #[arg(long, default_value_t = 0.02)]
    pub dt: f64,

    /// Hold the accelerometers constant over `START:END` (an interpolated gap).
    #[arg(long, value_name = "START:END", value_parser = parse_range)]
    pub flat: Option<(usize, usize)>,
}

#[derive(Debug, Args, Clone)]
pub struct ShowArgs {
    /// Model JSON produced by `sysid fit --write`.
    #[arg(long, value_name = "JSON")]
    pub model: PathBuf,
}

fn parse_range(s: &str) -> Result<(usize, usize), String> {
    let (a, b) = s
        .split_once(':')
        .ok_or_else(|| format!("expected START:END, got `{s}`"))?;
    let start: usize = a.trim().parse().map_err(|e| format!("bad start `{a}`: {e}"))?;
    let end: usize = b.trim().parse().map_err(|e| format!("bad end `{b}`: {e}"))?;
    if end <= start {
        return Err(format!("empty range `{s}`"));
    }
    Ok((start, end))
}
