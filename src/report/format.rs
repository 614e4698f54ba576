//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the math/fitting code stays clean and testable
//! - output changes are localized

use nalgebra::DMatrix;

use crate::data::builder::BuildOutput;
use crate::domain::{ModelFile, ResidualStats};
use crate::fit::experiment::{ControlSplit, DirectReport, FitAllReport};
use crate::fit::selection::{SelectionTrace, StopReason};
use crate::report::contrib::OutputContribution;
use crate::report::correlation::CorrelationPair;

/// Ingestion counters and per-bin sizes.
pub fn format_build_summary(build: &BuildOutput) -> String {
    let mut out = String::new();
    out.push_str("=== sysid - linear state-transition fit ===\n");
    out.push_str(&format!(
        "Samples: read={} | out-of-order={} | incomplete={} | lag warm-up={} | unbinned={}\n",
        build.samples_read,
        build.dropped_out_of_order,
        build.skipped_incomplete,
        build.skipped_warmup,
        build.unbinned
    ));
    out.push_str(&format!("dt: {:.4}s\n", build.dt));
    for bin in &build.bins {
        let removed: usize = bin.excised.iter().map(|s| s.len()).sum();
        out.push_str(&format!(
            "- bin {:<12} samples={:<7} excised={} ({} spans)\n",
            bin.condition.label(),
            bin.matrix.samples(),
            removed,
            bin.excised.len()
        ));
    }
    out
}

pub fn format_direct(label: &str, report: &DirectReport) -> String {
    let fit = &report.fit;
    let mut out = String::new();
    out.push_str(&format!(
        "\n[{label}] direct fit: {} outputs <- {} inputs, {} samples, rank(A)={}, design rank={}\n",
        fit.outputs.len(),
        fit.inputs.len(),
        fit.samples,
        fit.rank,
        fit.design_rank
    ));

    out.push_str(&residual_header());
    for (i, name) in fit.output_names.iter().enumerate() {
        out.push_str(&residual_line(name, "direct", &fit.residuals[i]));
        if let Some(r) = report.rollout.get(i) {
            out.push_str(&residual_line("", "rollout", r));
        }
    }

    out.push_str(&format_contributions(&report.contributions));
    if let Some(split) = &report.control {
        out.push_str(&format_control_split(split));
    }
    out
}

pub fn format_fit_all(label: &str, report: &FitAllReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "\n[{label}] fit-all: {} outputs <- {} inputs, {} samples, rank(A)={}\n",
        report.fit.outputs.len(),
        report.fit.inputs.len(),
        report.fit.samples,
        report.fit.rank
    ));
    out.push_str("(percentages relative to the std of each estimate)\n");
    out.push_str(&residual_header());
    for o in &report.outputs {
        out.push_str(&residual_line(&o.output, "direct", &o.direct));
        out.push_str(&residual_line("", "rollout", &o.rollout));
    }
    out.push_str(&format_contributions(&report.contributions));
    out
}

fn residual_header() -> String {
    format!(
        "{:<16} {:<8} {:>12} {:>9} {:>12} {:>12}\n",
        "output", "mode", "rms", "%std", "mean", "std"
    )
}

fn residual_line(name: &str, mode: &str, r: &ResidualStats) -> String {
    format!(
        "{:<16} {:<8} {:>12.6} {:>9} {:>12.6} {:>12.6}\n",
        name,
        mode,
        r.rms,
        fmt_pct(r.pct_of_output_std),
        r.mean,
        r.std
    )
}

pub fn format_contributions(contributions: &[OutputContribution]) -> String {
    let mut out = String::new();
    for c in contributions {
        out.push_str(&format!("\n{} contributors:\n", c.output));
        if c.contributors.is_empty() {
            out.push_str("  (none)\n");
        }
        for k in &c.contributors {
            out.push_str(&format!("  {:<20} {:>8.2}%\n", k.name, k.percent));
        }
        out.push_str(&format!("  {}\n", c.formula));
    }
    out
}

fn format_control_split(split: &ControlSplit) -> String {
    let mut out = String::new();
    out.push_str(&format!("\nControl block over [{}]:\n", split.control_names.join(", ")));
    out.push_str(&fmt_matrix(&split.control_block));
    match &split.control_inverse {
        Some(inv) => {
            out.push_str("Inverse:\n");
            out.push_str(&fmt_matrix(inv));
        }
        None => out.push_str("Inverse: not invertible\n"),
    }
    if !split.state_names.is_empty() {
        out.push_str(&format!("State block over [{}]:\n", split.state_names.join(", ")));
        out.push_str(&fmt_matrix(&split.state_block));
    }
    out
}

pub fn format_trace(label: &str, trace: &SelectionTrace) -> String {
    let mut out = String::new();
    out.push_str(&format!("\n[{label}] stepwise selection for `{}`\n", trace.target));
    out.push_str(&format!(
        "start: [{}] rms={}\n",
        trace.initial.join(", "),
        trace
            .initial_rms
            .map(|v| format!("{v:.6}"))
            .unwrap_or_else(|| "-".to_string())
    ));
    for (i, step) in trace.steps.iter().enumerate() {
        out.push_str(&format!(
            "{:>3}. +{:<20} rms={:<12.6} {:>9}  {}\n",
            i + 1,
            step.chosen,
            step.rms,
            fmt_pct(step.pct_of_output_std),
            step.formula
        ));
    }
    let stop = match trace.stop {
        StopReason::Exhausted => "candidates exhausted",
        StopReason::MarginalImprovement => "improvement below threshold",
        StopReason::NoValidCandidate => "no candidate could be fit",
    };
    out.push_str(&format!("stop: {stop}\n"));
    out
}

pub fn format_correlations(label: &str, pairs: &[CorrelationPair], top: usize) -> String {
    let mut out = String::new();
    out.push_str(&format!("\n[{label}] strongest correlations:\n"));
    for p in pairs.iter().take(top) {
        out.push_str(&format!("  {:<20} {:<20} {:>8.4}\n", p.a, p.b, p.r));
    }
    out
}

pub fn format_model_file(model: &ModelFile) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{} model, generated {} | dt={:.4}s | {} features | {} bins\n",
        model.tool,
        model.generated.format("%Y-%m-%d %H:%M:%S UTC"),
        model.dt,
        model.features.len(),
        model.bins.len()
    ));
    for bin in &model.bins {
        out.push_str(&format!(
            "\n[{}] {} samples, rank={} (design {})\n",
            bin.condition.label(),
            bin.samples,
            bin.rank,
            bin.design_rank
        ));
        out.push_str(&format!("inputs : {}\n", bin.inputs.join(", ")));
        for (i, name) in bin.outputs.iter().enumerate() {
            let row = bin.coefficients.get(i).map(Vec::as_slice).unwrap_or(&[]);
            out.push_str(&format!(
                "  {}\n",
                crate::report::contrib::formula(name, row, &bin.inputs)
            ));
        }
    }
    out
}

fn fmt_pct(v: Option<f64>) -> String {
    match v {
        Some(p) => format!("{p:.2}%"),
        None => "-".to_string(),
    }
}

fn fmt_matrix(m: &DMatrix<f64>) -> String {
    let mut out = String::new();
    for r in 0..m.nrows() {
        let cells: Vec<String> = m.row(r).iter().map(|v| format!("{v:>12.5}")).collect();
        out.push_str(&format!("  {}\n", cells.join(" ")));
    }
    out
}
