//! Reading saved sessions back into plain data.
//!
//! - `sections`: splits session text at its `# ---- name ----` headers
//! - `symbols`: parameter, function and model tables (pure resolution stages)
//! - `parser`: replays a session in a staging engine and collects per-dataset entries
//! - `peaks`: the peak listing codec

pub mod parser;
pub mod peaks;
pub mod sections;
pub mod symbols;

pub use parser::{ParsedTemplate, ParsedTemplateEntry, parse_session_file, parse_session_text};
pub use peaks::{DecodeError, PeakRecord, PeakTable, Uncertainty, decode_peak_listing, encode_peak_listing};
pub use symbols::FunctionDef;

use crate::engine::EngineError;

/// Fatal parse failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("cannot read '{path}': {message}")]
    Io { path: String, message: String },
}

/// A reference that could not be resolved. Parsing continues with the literal
/// token left in place.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseAnomaly {
    #[error("unresolved parameter ${name} in {context}")]
    UnresolvedParameter { name: String, context: String },
    #[error("unresolved function %{id} in the model of @{dataset}")]
    UnresolvedFunction { id: String, dataset: usize },
    #[error("unrecognized line in {section}: '{line}'")]
    UnrecognizedLine { section: &'static str, line: String },
    #[error("model of @{dataset} rejected by the engine: {reason}")]
    RejectedModel { dataset: usize, reason: String },
}
