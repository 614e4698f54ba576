//! Fitting orchestration.
//!
//! Responsibilities:
//!
//! - solve one-step operators for fixed regressor/output sets (`solver`)
//! - grow regressor sets greedily (`selection`)
//! - validate operators closed-loop with saturation (`rollout`)
//! - the one-shot and direct experiment paths (`experiment`)

pub mod experiment;
pub mod rollout;
pub mod selection;
pub mod solver;

pub use experiment::*;
pub use rollout::*;
pub use selection::*;
pub use solver::*;
