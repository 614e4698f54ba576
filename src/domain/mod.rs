//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - the feature registry and lag declarations (`FeatureRegistry`, `LagSpec`)
//! - the training matrix (`TrainingMatrix`, `Span`)
//! - samples, condition bins, fit results and artifact records
//! - the experiment file (`ExperimentConfig`)

pub mod config;
pub mod matrix;
pub mod registry;
pub mod types;

pub use config::*;
pub use matrix::*;
pub use registry::*;
pub use types::*;
