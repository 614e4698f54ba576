//! Model evaluation for a saved artifact.
//!
//! Downstream consumers only need two primitive operations:
//! - `next = A · state` for a bin's regressor set
//! - clamp the result to the bin's saturation range
//!
//! `ConditionModel` is the in-memory form of one `BinModel`.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};

use crate::domain::{BinModel, ConditionBin, ModelFile};
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct ConditionModel {
    pub condition: ConditionBin,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    a: DMatrix<f64>,
    bounds: Vec<(f64, f64)>,
}

impl ConditionModel {
    pub fn from_bin(bin: &BinModel) -> Result<Self, AppError> {
        let (m, k) = (bin.outputs.len(), bin.inputs.len());
        if bin.coefficients.len() != m || bin.coefficients.iter().any(|row| row.len() != k) {
            return Err(AppError::config(format!(
                "Bin {} coefficients are not {m}×{k}.",
                bin.condition.label()
            )));
        }
        let a = DMatrix::from_fn(m, k, |r, c| bin.coefficients[r][c]);

        let bounds = bin
            .outputs
            .iter()
            .map(|name| {
                bin.parameters
                    .iter()
                    .find(|p| p.name == *name)
                    .map(|p| p.bounds())
                    .ok_or_else(|| {
                        AppError::config(format!(
                            "Bin {} has no parameter statistics for `{name}`.",
                            bin.condition.label()
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            condition: bin.condition.clone(),
            inputs: bin.inputs.clone(),
            outputs: bin.outputs.clone(),
            a,
            bounds,
        })
    }

    pub fn coefficients(&self) -> &DMatrix<f64> {
        &self.a
    }

    /// `A · x` for a regressor vector in `inputs` order.
    pub fn predict_vector(&self, x: &[f64]) -> Result<DVector<f64>, AppError> {
        if x.len() != self.inputs.len() {
            return Err(AppError::config(format!(
                "State has {} values, model expects {}.",
                x.len(),
                self.inputs.len()
            )));
        }
        Ok(&self.a * DVector::from_column_slice(x))
    }

    /// Clamped next-step outputs from a named state.
    pub fn step(&self, state: &HashMap<String, f64>) -> Result<Vec<(String, f64)>, AppError> {
        let x = self
            .inputs
            .iter()
            .map(|name| {
                state
                    .get(name)
                    .copied()
                    .ok_or_else(|| AppError::config(format!("State is missing `{name}`.")))
            })
            .collect::<Result<Vec<f64>, _>>()?;
        let mut next = self.predict_vector(&x)?;
        self.clamp(next.as_mut_slice());
        Ok(self.outputs.iter().cloned().zip(next.iter().copied()).collect())
    }

    pub fn clamp(&self, next: &mut [f64]) {
        for (v, (lo, hi)) in next.iter_mut().zip(&self.bounds) {
            *v = v.clamp(*lo, *hi);
        }
    }
}

/// All bins of a model file.
pub fn load_models(file: &ModelFile) -> Result<Vec<ConditionModel>, AppError> {
    file.bins.iter().map(ConditionModel::from_bin).collect()
}

/// First bin whose condition accepts `value`.
pub fn model_for(models: &[ConditionModel], value: f64) -> Option<&ConditionModel> {
    models.iter().find(|m| m.condition.matches(value))
}
