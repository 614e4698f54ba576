//! Read/write model artifact JSON.
//!
//! The artifact is the portable form of a fit:
//! - the feature registry (sampled features + lag declarations)
//! - per condition bin: inputs, outputs, `A`, ranks, residuals, parameter stats
//!
//! The schema is defined by `domain::ModelFile`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::Utc;

use crate::domain::{BinModel, ConditionBin, FeatureRegistry, FitResult, ModelFile, ParameterStats};
use crate::error::AppError;

pub const TOOL_NAME: &str = "sysid";

pub fn bin_model(condition: &ConditionBin, fit: &FitResult, parameters: &[ParameterStats]) -> BinModel {
    BinModel {
        condition: condition.clone(),
        samples: fit.samples,
        inputs: fit.input_names.clone(),
        outputs: fit.output_names.clone(),
        coefficients: (0..fit.outputs.len()).map(|i| fit.row(i)).collect(),
        rank: fit.rank,
        design_rank: fit.design_rank,
        residuals: fit.residuals.clone(),
        parameters: parameters.to_vec(),
    }
}

pub fn model_file(registry: &FeatureRegistry, dt: f64, bins: Vec<BinModel>) -> ModelFile {
    ModelFile {
        tool: TOOL_NAME.to_string(),
        generated: Utc::now(),
        dt,
        features: registry.sampled_names().to_vec(),
        lags: registry.lag_specs().to_vec(),
        bins,
    }
}

pub fn write_model_json(path: &Path, model: &ModelFile) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::config(format!("Failed to create model JSON '{}': {e}", path.display())))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, model)
        .map_err(|e| AppError::config(format!("Failed to write model JSON: {e}")))?;
    writer
        .flush()
        .map_err(|e| AppError::config(format!("Failed to write model JSON: {e}")))
}

pub fn read_model_json(path: &Path) -> Result<ModelFile, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::config(format!("Failed to open model JSON '{}': {e}", path.display())))?;
    let model: ModelFile =
        serde_json::from_reader(file).map_err(|e| AppError::config(format!("Invalid model JSON: {e}")))?;
    // Rebuilding the registry re-validates the feature and lag declarations.
    FeatureRegistry::new(&model.features, &model.lags)?;
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LagSpec, ResidualStats};
    use nalgebra::DMatrix;

    fn fit() -> FitResult {
        FitResult {
            inputs: vec![0, 1],
            outputs: vec![1],
            input_names: vec!["one".into(), "p".into()],
            output_names: vec!["p".into()],
            coefficients: DMatrix::from_row_slice(1, 2, &[0.1, 0.9]),
            rank: 1,
            design_rank: 2,
            residuals: vec![ResidualStats::from_residual(&[0.1, -0.1], &[1.0, 2.0])],
            samples: 99,
        }
    }

    #[test]
    fn artifact_round_trips_through_json() {
        let reg = FeatureRegistry::new(&["one".to_string(), "p".to_string()], &[LagSpec::new("p", 1)]).unwrap();
        let params = vec![ParameterStats::from_series("p", &[1.0, 2.0, 4.0])];
        let bin = bin_model(&ConditionBin::new("flaps", 0.5, 0.1), &fit(), &params);
        assert_eq!(bin.coefficients, vec![vec![0.1, 0.9]]);

        let model = model_file(&reg, 0.02, vec![bin]);
        let path = std::env::temp_dir().join(format!("sysid-model-{}.json", std::process::id()));
        write_model_json(&path, &model).unwrap();
        let back = read_model_json(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(back, model);
        assert_eq!(back.lags, vec![LagSpec::new("p", 1)]);
    }

    #[test]
    fn invalid_json_is_a_config_error() {
        let path = std::env::temp_dir().join(format!("sysid-bad-{}.json", std::process::id()));
        std::fs::write(&path, "{ not json").unwrap();
        let err = read_model_json(&path).unwrap_err();
        let _ = std::fs::remove_file(&path);
        assert_eq!(err.exit_code(), 2);
    }
}
