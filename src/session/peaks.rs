//! Peak listing codec.
//!
//! Engines describe a dataset's model as a free-text listing:
//!
//! ```text
//! # PeakType  Center  Height  Area  FWHM  parameters...
//! %_1  Gaussian  5  10  21.29  2  10 5 1
//! %_2  Constant  x  x  x  x  0.5
//! ```
//!
//! With uncertainties every column becomes `value ± error`. `x` marks a value the
//! shape does not define, or an error the engine could not compute.

use serde::Serialize;

use crate::engine::StandardParam;

/// Marker for "not applicable" values and "not computed" errors.
pub const UNKNOWN_MARKER: &str = "x";

const SEPARATORS: [&str; 2] = ["±", "+/-"];

/// Uncertainty of one listed value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Uncertainty {
    Known(f64),
    /// The engine produced the value but not its variance.
    Unknown,
}

impl Uncertainty {
    pub fn value(self) -> Option<f64> {
        match self {
            Uncertainty::Known(v) => Some(v),
            Uncertainty::Unknown => None,
        }
    }
}

/// One function of a model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeakRecord {
    pub id: String,
    pub type_name: String,
    pub center: Option<f64>,
    pub height: Option<f64>,
    pub area: Option<f64>,
    pub fwhm: Option<f64>,
    /// Remaining positional columns.
    pub extra: Vec<f64>,
    /// One entry per value column (standard columns first), when listed.
    pub errors: Option<Vec<Uncertainty>>,
}

impl PeakRecord {
    pub fn standard(&self, param: StandardParam) -> Option<f64> {
        match param {
            StandardParam::Center => self.center,
            StandardParam::Height => self.height,
            StandardParam::Area => self.area,
            StandardParam::Fwhm => self.fwhm,
        }
    }

    /// Number of value columns (standard + extra).
    pub fn value_columns(&self) -> usize {
        StandardParam::ALL.len() + self.extra.len()
    }
}

/// Decoded listing. The default value is the canonical empty table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PeakTable {
    pub records: Vec<PeakRecord>,
    pub with_errors: bool,
}

impl PeakTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn max_extra(&self) -> usize {
        self.records.iter().map(|r| r.extra.len()).max().unwrap_or(0)
    }

    /// Column names for tabular exports: id, type, standard, `a1..aN`, then `*_err`.
    pub fn column_names(&self) -> Vec<String> {
        let mut values: Vec<String> = StandardParam::ALL.iter().map(|p| p.column_name().to_string()).collect();
        values.extend((1..=self.max_extra()).map(|i| format!("a{i}")));

        let mut out = vec!["id".to_string(), "type".to_string()];
        out.extend(values.iter().cloned());
        if self.with_errors {
            out.extend(values.iter().map(|v| format!("{v}_err")));
        }
        out
    }
}

/// A listing line that does not follow the format. No partial table is kept.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("line {line_no} ('{line}'): {reason}")]
pub struct DecodeError {
    pub line_no: usize,
    pub line: String,
    pub reason: String,
}

fn is_separator(token: &str) -> bool {
    SEPARATORS.contains(&token)
}

/// Decode an engine peak listing.
pub fn decode_peak_listing(raw: &str) -> Result<PeakTable, DecodeError> {
    let with_errors = raw.split_whitespace().any(is_separator);
    let mut records = Vec::new();

    for (idx, line) in raw.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let fail = |reason: String| DecodeError {
            line_no: idx + 1,
            line: trimmed.to_string(),
            reason,
        };
        records.push(decode_line(trimmed, with_errors).map_err(fail)?);
    }

    Ok(PeakTable { records, with_errors })
}

fn decode_line(line: &str, with_errors: bool) -> Result<PeakRecord, String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 2 {
        return Err("expected '%id Type' followed by values".to_string());
    }
    let id = tokens[0].trim_start_matches('%').to_string();
    let type_name = tokens[1].to_string();

    let mut values: Vec<&str> = Vec::new();
    let mut errors: Vec<&str> = Vec::new();
    let mut rest = tokens[2..].iter();
    while let Some(token) = rest.next() {
        if is_separator(token) {
            return Err("uncertainty without a value".to_string());
        }
        values.push(token);
        if with_errors {
            match (rest.next(), rest.next()) {
                (Some(sep), Some(err)) if is_separator(sep) && !is_separator(err) => errors.push(err),
                _ => return Err(format!("value '{token}' has no uncertainty")),
            }
        }
    }

    let n_std = StandardParam::ALL.len();
    if values.len() < n_std {
        return Err(format!("expected at least {n_std} value columns, found {}", values.len()));
    }

    let standard = values[..n_std]
        .iter()
        .map(|t| parse_optional(t))
        .collect::<Result<Vec<_>, _>>()?;
    let extra = values[n_std..]
        .iter()
        .map(|t| t.parse::<f64>().map_err(|_| format!("non-numeric parameter '{t}'")))
        .collect::<Result<Vec<_>, _>>()?;
    let errors = if with_errors {
        Some(errors.iter().map(|t| parse_uncertainty(t)).collect::<Result<Vec<_>, _>>()?)
    } else {
        None
    };

    Ok(PeakRecord {
        id,
        type_name,
        center: standard[0],
        height: standard[1],
        area: standard[2],
        fwhm: standard[3],
        extra,
        errors,
    })
}

fn parse_optional(token: &str) -> Result<Option<f64>, String> {
    if token == UNKNOWN_MARKER {
        return Ok(None);
    }
    token
        .parse::<f64>()
        .map(Some)
        .map_err(|_| format!("non-numeric value '{token}'"))
}

fn parse_uncertainty(token: &str) -> Result<Uncertainty, String> {
    Ok(match parse_optional(token)? {
        Some(v) => Uncertainty::Known(v),
        None => Uncertainty::Unknown,
    })
}

fn fmt_value(v: Option<f64>) -> String {
    v.map(|v| format!("{v}")).unwrap_or_else(|| UNKNOWN_MARKER.to_string())
}

/// Render a table in the listing format read by [`decode_peak_listing`].
pub fn encode_peak_listing(table: &PeakTable) -> String {
    let mut out = String::from("# PeakType\tCenter\tHeight\tArea\tFWHM\tparameters...\n");
    for r in &table.records {
        let values: Vec<Option<f64>> = StandardParam::ALL
            .iter()
            .map(|p| r.standard(*p))
            .chain(r.extra.iter().map(|v| Some(*v)))
            .collect();
        let columns: Vec<String> = values
            .iter()
            .enumerate()
            .map(|(i, v)| match (&r.errors, table.with_errors) {
                (Some(errs), true) => {
                    let err = errs.get(i).and_then(|e| e.value());
                    format!("{} ± {}", fmt_value(*v), fmt_value(err))
                }
                (None, true) => format!("{} ± {}", fmt_value(*v), UNKNOWN_MARKER),
                _ => fmt_value(*v),
            })
            .collect();
        out.push_str(&format!("%{}\t{}\t{}\n", r.id, r.type_name, columns.join("\t")));
    }
    out
}
