//! Saved-model evaluation (`next = A · state`, clamped).

pub mod model;

pub use model::*;
