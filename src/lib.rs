//! `flight-sysid` library crate.
//!
//! Identifies linear state-transition models `next = A · state` from logged
//! flight data, per operating condition.
//!
//! The binary (`sysid`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the fitting and model-evaluation code is reusable from other tools

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
