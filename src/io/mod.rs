//! Input/output helpers.
//!
//! - CSV flight-log ingest (`ingest`)
//! - model artifact JSON read/write (`model`)
//! - session cache of built bins (`session`)
//! - estimate and sample CSV exports (`export`)

pub mod export;
pub mod ingest;
pub mod model;
pub mod session;

pub use export::*;
pub use ingest::*;
pub use model::*;
pub use session::*;
