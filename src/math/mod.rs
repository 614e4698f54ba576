//! Mathematical utilities: least squares, smoothing and descriptive statistics.

pub mod lstsq;
pub mod smooth;
pub mod stats;

pub use lstsq::*;
pub use smooth::*;
