//! Input/output helpers.
//!
//! - spectral map files (`map`)
//! - session exports (CSV/JSON) (`export`)

pub mod export;
pub mod map;

pub use export::*;
pub use map::*;
