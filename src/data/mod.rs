//! Turning sample streams into per-bin training matrices.
//!
//! - bin assembly, lag history, dt estimation (`builder`)
//! - flat-segment excision (`excise`)
//! - seeded synthetic flight streams (`synthetic`)

pub mod builder;
pub mod excise;
pub mod synthetic;

pub use builder::*;
pub use excise::*;
pub use synthetic::*;
