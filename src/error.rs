//! Application-level error type plus the small typed errors shared across modules.
//!
//! Modules return their own `thiserror` enums; the app boundary folds them into
//! `AppError`, which carries the process exit code:
//!
//! - `2`: configuration / input file problems
//! - `3`: template or data that cannot be used (shape mismatch, bad listing)
//! - `4`: engine command failures

use crate::engine::EngineError;
use crate::session::ParseError;
use crate::session::peaks::DecodeError;

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

/// Invalid run configuration, detected before any data is processed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("smoothing window {window} exceeds spectrum length {len}")]
    WindowTooLong { window: usize, len: usize },
    #[error("smoothing window {window} must be larger than the polynomial order {order}")]
    WindowTooShort { window: usize, order: usize },
    #[error("unknown match method '{0}'")]
    UnknownMetric(String),
    #[error("unknown input style '{0}'")]
    UnknownStyle(String),
    #[error("unknown preprocess option '{0}'; accepted keys are b, s, n, a")]
    UnknownPreprocessKey(char),
}

/// Input and template spectra cannot be compared.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ShapeMismatch {
    #[error("input spectra have {input} samples but templates have {template}")]
    Length { input: usize, template: usize },
    #[error("template set is empty")]
    NoTemplates,
    #[error("{labels} labels supplied for {spectra} spectra")]
    Labels { labels: usize, spectra: usize },
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::new(2, format!("Configuration error: {err}"))
    }
}

impl From<ShapeMismatch> for AppError {
    fn from(err: ShapeMismatch) -> Self {
        AppError::new(3, format!("Shape mismatch: {err}"))
    }
}

impl From<DecodeError> for AppError {
    fn from(err: DecodeError) -> Self {
        AppError::new(3, format!("Peak listing error: {err}"))
    }
}

impl From<ParseError> for AppError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::Decode(e) => e.into(),
            ParseError::Engine(e) => AppError::new(3, format!("Template replay failed: {e}")),
            ParseError::Io { path, message } => AppError::new(2, format!("Failed to read '{path}': {message}")),
        }
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Io(msg) => AppError::new(2, msg),
            other => AppError::new(4, format!("Engine error: {other}")),
        }
    }
}
