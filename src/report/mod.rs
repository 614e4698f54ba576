//! Reporting: contribution analysis, correlations, and formatted terminal output.

pub mod contrib;
pub mod correlation;
pub mod format;

pub use contrib::*;
pub use correlation::*;
pub use format::*;
