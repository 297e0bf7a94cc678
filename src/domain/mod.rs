//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - measured data (`Point`, `Dataset`, `SpectralMap`)
//! - input conventions (`MapStyle`)
//! - run configuration (`RunConfig`, `ExportConfig`, `PreprocessOptions`)

pub mod types;

pub use types::*;
