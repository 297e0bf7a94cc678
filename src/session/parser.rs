//! Session text → per-dataset template entries.
//!
//! Symbolic references are resolved by the pure stages in `symbols`; dataset
//! points, titles and peak tables come from replaying the session in a staging
//! engine, which is reset first and left with no models afterwards.

use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::Dataset;
use crate::engine::{Engine, EngineError};
use crate::session::peaks::{PeakTable, decode_peak_listing};
use crate::session::sections::split_sections;
use crate::session::symbols::{FunctionDef, FunctionTable, ModelTable, ParameterTable};
use crate::session::{ParseAnomaly, ParseError};

/// One dataset of a parsed session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedTemplateEntry {
    pub index: usize,
    pub title: String,
    /// Resolved model, e.g. `Gaussian(~10, ~5, 1.5) + Constant(~0.2)`; empty without functions.
    pub model_formula: String,
    pub function_ids: Vec<String>,
    /// One definition per entry of `function_ids`.
    pub functions: Vec<FunctionDef>,
    pub peaks: PeakTable,
    pub data: Dataset,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTemplate {
    pub entries: Vec<ParsedTemplateEntry>,
    /// `define` lines of the session, in order.
    pub defines: Vec<String>,
    pub anomalies: Vec<ParseAnomaly>,
}

impl ParsedTemplate {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn placeholder(id: &str) -> FunctionDef {
    FunctionDef {
        id: id.to_string(),
        type_name: String::new(),
        expression: format!("%{id}"),
        parameters: Vec::new(),
    }
}

/// Parse session text, replaying it in `staging`.
///
/// With `with_errors` the peak tables carry uncertainty columns when the engine
/// can compute them; datasets without unlocked parameters fall back to plain
/// listings.
pub fn parse_session_text<E: Engine>(
    text: &str,
    staging: &mut E,
    with_errors: bool,
) -> Result<ParsedTemplate, ParseError> {
    let sections = split_sections(text);

    let (params, mut anomalies) = ParameterTable::build(&sections.variables);
    let (functions, fn_anomalies) = FunctionTable::resolve(&sections.variables, &params);
    let (models, model_anomalies) = ModelTable::resolve(&sections.models, &functions);
    anomalies.extend(fn_anomalies);
    anomalies.extend(model_anomalies);
    debug!(
        parameters = params.len(),
        functions = functions.len(),
        "resolved session symbols"
    );

    staging.reset();
    let mut defines = Vec::new();
    for line in &sections.defines {
        if line.starts_with("define") {
            staging.define_function_type(line)?;
            defines.push(line.clone());
        } else {
            staging.execute(line)?;
        }
    }
    for line in &sections.datasets {
        staging.execute(line)?;
    }

    let mut entries = Vec::with_capacity(staging.dataset_count());
    for index in 0..staging.dataset_count() {
        let model = models.get(index);
        let model_formula = model.map(|m| m.formula.clone()).unwrap_or_default();
        let function_ids = model.map(|m| m.function_ids.clone()).unwrap_or_default();
        let defs = function_ids
            .iter()
            .map(|id| functions.get(id).cloned().unwrap_or_else(|| placeholder(id)))
            .collect();

        let peaks = if model_formula.is_empty() {
            PeakTable::default()
        } else {
            match staging.set_model(index, &model_formula) {
                Ok(()) => {
                    let peaks = listing(staging, index, with_errors)?;
                    staging.clear_model(index)?;
                    peaks
                }
                Err(e) => {
                    anomalies.push(ParseAnomaly::RejectedModel {
                        dataset: index,
                        reason: e.to_string(),
                    });
                    PeakTable::default()
                }
            }
        };

        entries.push(ParsedTemplateEntry {
            index,
            title: staging.dataset_title(index)?,
            model_formula,
            function_ids,
            functions: defs,
            peaks,
            data: Dataset {
                title: staging.dataset_title(index)?,
                points: staging.points(index)?,
            },
        });
    }

    for anomaly in &anomalies {
        warn!(%anomaly, "session parse anomaly");
    }

    Ok(ParsedTemplate {
        entries,
        defines,
        anomalies,
    })
}

fn listing<E: Engine>(staging: &E, index: usize, with_errors: bool) -> Result<PeakTable, ParseError> {
    let raw = match staging.peak_listing(index, with_errors) {
        Ok(raw) => raw,
        Err(EngineError::NoParametrizedFunctions(_)) if with_errors => {
            debug!(dataset = index, "no parametrized functions; listing without errors");
            staging.peak_listing(index, false)?
        }
        Err(e) => return Err(e.into()),
    };
    Ok(decode_peak_listing(&raw)?)
}

pub fn parse_session_file<E: Engine>(
    path: &Path,
    staging: &mut E,
    with_errors: bool,
) -> Result<ParsedTemplate, ParseError> {
    let text = std::fs::read_to_string(path).map_err(|e| ParseError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    parse_session_text(&text, staging, with_errors)
}
