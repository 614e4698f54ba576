//! Experiment file (`--config <json>`).
//!
//! The declarative half of a run: which features exist, which lags to keep,
//! how to bin, what to fit. Run-level knobs (paths, seeds, output files) stay
//! on the command line.

use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::excise::ExcisionConfig;
use crate::domain::registry::{FeatureRegistry, LagSpec};
use crate::domain::types::{ConditionBin, DEFAULT_CONDITION_TOLERANCE};
use crate::error::AppError;
use crate::math::lstsq::SolveOptions;
use crate::math::smooth::LowPassConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub features: Vec<String>,
    #[serde(default)]
    pub lags: Vec<LagSpec>,
    #[serde(default)]
    pub condition_key: Option<String>,
    #[serde(default)]
    pub conditions: Vec<f64>,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Sampling interval in seconds; estimated from timestamps when absent.
    #[serde(default)]
    pub dt: Option<f64>,
    #[serde(default)]
    pub excision: ExcisionConfig,
    #[serde(default)]
    pub lowpass: Option<LowPassConfig>,
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Regressors for the direct fit. `None` means every feature except
    /// the outputs (or every feature, when `self_reference`).
    #[serde(default)]
    pub inputs: Option<Vec<String>>,
    #[serde(default)]
    pub self_reference: bool,
    /// Leading inputs that form the square control block (0 = no split).
    #[serde(default)]
    pub control_inputs: usize,
    #[serde(default)]
    pub reverse_time: bool,
    #[serde(default)]
    pub select: Option<SelectConfig>,
    #[serde(default)]
    pub solver: SolveOptions,
}

/// Stepwise selection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectConfig {
    pub target: String,
    #[serde(default = "default_seeds")]
    pub seeds: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Candidate pool; `None` means every feature.
    #[serde(default)]
    pub candidates: Option<Vec<String>>,
    #[serde(default)]
    pub self_reference: bool,
    #[serde(default)]
    pub min_improvement: Option<f64>,
}

fn default_tolerance() -> f64 {
    DEFAULT_CONDITION_TOLERANCE
}

fn default_seeds() -> Vec<String> {
    vec!["one".to_string()]
}

impl ExperimentConfig {
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let file = File::open(path).map_err(|e| {
            AppError::config(format!("Failed to open experiment file '{}': {e}", path.display()))
        })?;
        serde_json::from_reader(file)
            .map_err(|e| AppError::config(format!("Invalid experiment file '{}': {e}", path.display())))
    }

    pub fn registry(&self) -> Result<FeatureRegistry, AppError> {
        FeatureRegistry::new(&self.features, &self.lags)
    }

    pub fn condition_bins(&self) -> Result<Vec<ConditionBin>, AppError> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(AppError::config(format!(
                "Condition tolerance must be > 0 (got {}).",
                self.tolerance
            )));
        }
        match (&self.condition_key, self.conditions.is_empty()) {
            (_, true) => Ok(Vec::new()),
            (None, false) => Err(AppError::config("`conditions` given without a `condition_key`.")),
            (Some(key), false) => Ok(self
                .conditions
                .iter()
                .map(|&target| ConditionBin::new(key.clone(), target, self.tolerance))
                .collect()),
        }
    }

    /// Check every name the experiment refers to against the registry.
    pub fn validate(&self, registry: &FeatureRegistry) -> Result<(), AppError> {
        registry.indices(&self.outputs)?;
        if let Some(inputs) = &self.inputs {
            registry.indices(inputs)?;
            if self.control_inputs > inputs.len() {
                return Err(AppError::config(format!(
                    "control_inputs ({}) exceeds the number of inputs ({}).",
                    self.control_inputs,
                    inputs.len()
                )));
            }
        }
        self.excision.validate(registry)?;
        if let Some(select) = &self.select {
            registry.index(&select.target)?;
            registry.indices(&select.seeds)?;
            registry.indices(&select.exclude)?;
            if let Some(c) = &select.candidates {
                registry.indices(c)?;
            }
            if let Some(m) = select.min_improvement {
                if !(m.is_finite() && m >= 0.0) {
                    return Err(AppError::config(format!("min_improvement must be >= 0 (got {m}).")));
                }
            }
        }
        if let Some(rcond) = self.solver.rcond {
            if !(rcond.is_finite() && rcond >= 0.0) {
                return Err(AppError::config(format!("solver.rcond must be >= 0 (got {rcond}).")));
            }
        }
        self.condition_bins()?;
        Ok(())
    }

    /// Direct-fit regressors, resolved against the registry.
    pub fn resolved_inputs(&self, registry: &FeatureRegistry) -> Result<Vec<usize>, AppError> {
        if let Some(inputs) = &self.inputs {
            return registry.indices(inputs);
        }
        let outputs = registry.indices(&self.outputs)?;
        Ok((0..registry.len())
            .filter(|i| self.self_reference || !outputs.contains(i))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> ExperimentConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn defaults_fill_in_optional_sections() {
        let cfg = parse(r#"{"features": ["one", "x", "y"], "outputs": ["y"]}"#);
        assert_eq!(cfg.tolerance, 0.1);
        assert!(cfg.excision.enabled);
        assert_eq!(cfg.excision.min_run, 25);
        assert_eq!(cfg.solver, SolveOptions::default());
        assert!(cfg.condition_bins().unwrap().is_empty());
    }

    #[test]
    fn unknown_output_fails_validation() {
        let cfg = parse(
            r#"{"features": ["one", "x"], "outputs": ["z"], "excision": {"enabled": false}}"#,
        );
        let reg = cfg.registry().unwrap();
        assert_eq!(cfg.validate(&reg).unwrap_err().exit_code(), 2);
    }

    #[test]
    fn missing_accel_features_fail_when_excision_enabled() {
        let cfg = parse(r#"{"features": ["one", "x"], "outputs": ["x"]}"#);
        let reg = cfg.registry().unwrap();
        assert!(cfg.validate(&reg).is_err());
    }

    #[test]
    fn default_inputs_exclude_outputs_unless_self_referencing() {
        let mut cfg = parse(
            r#"{"features": ["one", "x", "y"], "outputs": ["y"], "excision": {"enabled": false}}"#,
        );
        let reg = cfg.registry().unwrap();
        assert_eq!(cfg.resolved_inputs(&reg).unwrap(), vec![0, 1]);
        cfg.self_reference = true;
        assert_eq!(cfg.resolved_inputs(&reg).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn conditions_build_bins_with_shared_tolerance() {
        let cfg = parse(
            r#"{"features": ["one"], "condition_key": "flaps", "conditions": [0.0, 0.5], "tolerance": 0.05}"#,
        );
        let bins = cfg.condition_bins().unwrap();
        assert_eq!(bins.len(), 2);
        assert_eq!(bins[1], ConditionBin::new("flaps", 0.5, 0.05));
    }
}
