//! Fitting-engine capability interface.
//!
//! Everything the parser and the orchestrator need from a fitting backend goes
//! through the [`Engine`] trait. The crate ships one backend, [`MemorySession`],
//! which understands the subset of the fityk scripting language that session
//! files use and carries a small built-in function library.
//!
//! Submodules:
//! - `expr`: arithmetic expressions used by custom function types
//! - `library`: built-in and user-defined function types
//! - `memory`: the in-process session (`MemorySession`)
//! - `script`: the line-oriented command interpreter

use std::path::Path;

use serde::Serialize;

use crate::domain::Point;

pub mod expr;
pub mod library;
pub mod memory;
pub mod script;

pub use memory::MemorySession;

/// Errors reported by an engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// `run_fit` was asked to optimize a model without unlocked parameters.
    #[error("no fittable parameters in @{0}")]
    NoFittableParameters(usize),
    /// An uncertainty listing needs at least one parametrized function.
    #[error("no parametrized functions in @{0}")]
    NoParametrizedFunctions(usize),
    #[error("no active points in @{0}")]
    NoActivePoints(usize),
    #[error("dataset @{index} does not exist ({count} datasets)")]
    UnknownDataset { index: usize, count: usize },
    #[error("point {point} does not exist in @{dataset}")]
    UnknownPoint { dataset: usize, point: usize },
    #[error("unknown function type '{0}'")]
    UnknownFunctionType(String),
    #[error("undefined {kind} '{name}'")]
    Undefined { kind: &'static str, name: String },
    #[error("unknown option '{0}'")]
    UnknownOption(String),
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("{0}")]
    Io(String),
}

/// Shape parameters with a standard meaning across function types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StandardParam {
    Center,
    Height,
    Area,
    Fwhm,
}

impl StandardParam {
    pub const ALL: [StandardParam; 4] = [
        StandardParam::Center,
        StandardParam::Height,
        StandardParam::Area,
        StandardParam::Fwhm,
    ];

    pub fn column_name(self) -> &'static str {
        match self {
            StandardParam::Center => "Center",
            StandardParam::Height => "Height",
            StandardParam::Area => "Area",
            StandardParam::Fwhm => "FWHM",
        }
    }
}

/// One parameter of a component, as seen from outside the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentParam {
    pub name: String,
    pub value: f64,
    /// Unlocked parameters are varied by `run_fit`.
    pub unlocked: bool,
}

/// Snapshot of a function attached to a dataset model.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub name: String,
    pub type_name: String,
    pub params: Vec<ComponentParam>,
    pub center: Option<f64>,
    pub height: Option<f64>,
    pub area: Option<f64>,
    pub fwhm: Option<f64>,
}

impl Component {
    /// Value of a standard parameter, `None` when the shape does not define it.
    pub fn param_value(&self, param: StandardParam) -> Option<f64> {
        match param {
            StandardParam::Center => self.center,
            StandardParam::Height => self.height,
            StandardParam::Area => self.area,
            StandardParam::Fwhm => self.fwhm,
        }
    }

    /// Name of the `i`-th positional parameter.
    pub fn param(&self, i: usize) -> Option<&str> {
        self.params.get(i).map(|p| p.name.as_str())
    }

    /// Re-creatable expression, e.g. `Gaussian(~10, ~5, 1.5)`.
    ///
    /// Unlocked parameters keep their `~` marker so the expression stays
    /// fittable when it is installed into another session.
    pub fn expression(&self) -> String {
        let args: Vec<String> = self
            .params
            .iter()
            .map(|p| {
                if p.unlocked {
                    format!("~{}", p.value)
                } else {
                    format!("{}", p.value)
                }
            })
            .collect();
        format!("{}({})", self.type_name, args.join(", "))
    }
}

/// Capability interface of a fitting backend.
///
/// Dataset indices are zero-based and contiguous. `reset` removes datasets,
/// functions and variables, but keeps function-type definitions and options.
pub trait Engine {
    /// Execute one line of the scripting language.
    fn execute(&mut self, command: &str) -> Result<(), EngineError>;

    fn reset(&mut self);

    /// Load points into dataset `index`; `index == dataset_count()` appends.
    ///
    /// An empty `sigma` means unit weights.
    fn load_dataset(
        &mut self,
        index: usize,
        x: &[f64],
        y: &[f64],
        sigma: &[f64],
        title: Option<&str>,
    ) -> Result<(), EngineError>;

    fn dataset_count(&self) -> usize;

    fn point(&self, dataset: usize, index: usize) -> Result<Point, EngineError>;

    fn points(&self, dataset: usize) -> Result<Vec<Point>, EngineError>;

    fn set_point_active(&mut self, dataset: usize, index: usize, active: bool) -> Result<(), EngineError>;

    /// Register a custom function type. Re-defining a known name is a no-op.
    fn define_function_type(&mut self, definition: &str) -> Result<(), EngineError>;

    fn has_function_type(&self, name: &str) -> bool;

    /// Replace the model of a dataset with `formula` (a `+`-separated sum).
    fn set_model(&mut self, dataset: usize, formula: &str) -> Result<(), EngineError>;

    fn clear_model(&mut self, dataset: usize) -> Result<(), EngineError>;

    fn components(&self, dataset: usize) -> Result<Vec<Component>, EngineError>;

    fn run_fit(&mut self, dataset: usize) -> Result<(), EngineError>;

    fn peak_listing(&self, dataset: usize, with_errors: bool) -> Result<String, EngineError>;

    fn dataset_title(&self, dataset: usize) -> Result<String, EngineError>;

    fn set_dataset_title(&mut self, dataset: usize, title: &str) -> Result<(), EngineError>;

    /// Full reproducible session text.
    fn state_text(&self) -> String;

    fn persist_state(&self, path: &Path) -> Result<(), EngineError> {
        std::fs::write(path, self.state_text())
            .map_err(|e| EngineError::Io(format!("Failed to write session '{}': {e}", path.display())))
    }

    fn set_option(&mut self, name: &str, value: &str) -> Result<(), EngineError>;
}

/// Extract the type name from a `define Name(...) = ...` line.
pub fn defined_type_name(definition: &str) -> Option<&str> {
    let rest = definition.trim().strip_prefix("define")?;
    let rest = rest.trim_start();
    let end = rest.find('(')?;
    let name = rest[..end].trim();
    if name.is_empty() { None } else { Some(name) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expression_keeps_lock_markers() {
        let c = Component {
            name: "_1".to_string(),
            type_name: "Gaussian".to_string(),
            params: vec![
                ComponentParam { name: "height".into(), value: 10.0, unlocked: true },
                ComponentParam { name: "center".into(), value: 5.5, unlocked: false },
                ComponentParam { name: "hwhm".into(), value: 1.0, unlocked: true },
            ],
            center: Some(5.5),
            height: Some(10.0),
            area: None,
            fwhm: Some(2.0),
        };
        assert_eq!(c.expression(), "Gaussian(~10, 5.5, ~1)");
        assert_eq!(c.param(1), Some("center"));
        assert_eq!(c.param(3), None);
        assert_eq!(c.param_value(StandardParam::Area), None);
    }

    #[test]
    fn defined_type_name_parses_header() {
        assert_eq!(defined_type_name("define GaussBg(h, c, w, b) = Gaussian(h, c, w) + b"), Some("GaussBg"));
        assert_eq!(defined_type_name("set verbosity = 0"), None);
    }
}
