//! Numerical utilities: least squares, smoothing and the damped optimizer.

pub mod lm;
pub mod ols;
pub mod savgol;

pub use lm::*;
pub use ols::*;
pub use savgol::*;
