//! Batch fitting over a spectral map.
//!
//! Responsibilities:
//!
//! - stage each spectrum in a reusable scratch session
//! - fit the matched template model and merge it into the aggregate session
//! - checkpoint the aggregate session every `split` spectra

pub mod checkpoint;
pub mod orchestrator;
pub mod staging;

pub use checkpoint::*;
pub use orchestrator::*;
pub use staging::*;
