//! `spectral-fitmap` library crate.
//!
//! The binary (`fitmap`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the engine, parser and matcher are reusable from other tools

pub mod app;
pub mod cli;
pub mod domain;
pub mod engine;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod report;
pub mod session;
pub mod spectra;
