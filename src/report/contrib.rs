//! Contribution Analyzer.
//!
//! For output `i` and regressor `j` the "energy" is `A[i,j] · std(row j)`,
//! the typical swing that regressor pushes into the output. Energies are
//! ranked by magnitude and expressed as signed percentages of the total
//! absolute energy. Purely descriptive; nothing here feeds back into fitting.

use serde::Serialize;

use crate::domain::{FitResult, TrainingMatrix};
use crate::math::stats;

/// Contributors below this absolute percentage are omitted.
pub const MIN_CONTRIBUTION_PCT: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contributor {
    pub name: String,
    pub energy: f64,
    /// Signed share of the total absolute energy, in percent.
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Term {
    pub coefficient: f64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputContribution {
    pub output: String,
    /// Ranked by descending `|energy|`.
    pub contributors: Vec<Contributor>,
    /// Regressor order, original coefficient units.
    pub terms: Vec<Term>,
    pub formula: String,
}

pub fn analyze(fit: &FitResult, matrix: &TrainingMatrix) -> Vec<OutputContribution> {
    let spreads: Vec<f64> = fit
        .inputs
        .iter()
        .map(|&row| stats::std_dev(&matrix.row_values(row)))
        .collect();

    fit.output_names
        .iter()
        .enumerate()
        .map(|(i, output)| {
            let coefficients = fit.row(i);
            let energies: Vec<f64> = coefficients.iter().zip(&spreads).map(|(a, s)| a * s).collect();
            OutputContribution {
                output: output.clone(),
                contributors: rank_contributors(&energies, &fit.input_names),
                terms: coefficients
                    .iter()
                    .zip(&fit.input_names)
                    .map(|(c, n)| Term {
                        coefficient: *c,
                        name: n.clone(),
                    })
                    .collect(),
                formula: formula(output, &coefficients, &fit.input_names),
            }
        })
        .collect()
}

/// Rank energies by magnitude. An all-zero row has no contributors.
pub fn rank_contributors(energies: &[f64], names: &[String]) -> Vec<Contributor> {
    let total: f64 = energies.iter().map(|e| e.abs()).sum();
    if !(total > 0.0) {
        return Vec::new();
    }
    let mut out: Vec<Contributor> = energies
        .iter()
        .zip(names)
        .map(|(&energy, name)| Contributor {
            name: name.clone(),
            energy,
            percent: 100.0 * energy / total,
        })
        .filter(|c| c.percent.abs() >= MIN_CONTRIBUTION_PCT)
        .collect();
    out.sort_by(|a, b| {
        b.energy
            .abs()
            .partial_cmp(&a.energy.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    out
}

/// `y = 1.000*one + 2.000*x`
pub fn formula(output: &str, coefficients: &[f64], names: &[String]) -> String {
    let mut s = format!("{output} =");
    for (k, (c, name)) in coefficients.iter().zip(names).enumerate() {
        let sign = if *c < 0.0 { "-" } else { "+" };
        if k == 0 && *c >= 0.0 {
            s.push_str(&format!(" {}*{name}", fmt_coefficient(c.abs())));
        } else {
            s.push_str(&format!(" {sign} {}*{name}", fmt_coefficient(c.abs())));
        }
    }
    s
}

fn fmt_coefficient(v: f64) -> String {
    if v == 0.0 || (1e-3..1e6).contains(&v) {
        format!("{v:.3}")
    } else {
        format!("{v:.3e}")
    }
}
