//! Export a parsed session to CSV (or JSON for peak tables).
//!
//! Files are named after the session file and written to the output directory:
//! `<stem>_data.csv`, `<stem>_peaks.csv` / `<stem>_peaks.json`.

use std::fs::File;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::domain::ExportConfig;
use crate::error::AppError;
use crate::session::{ParsedTemplate, PeakTable, Uncertainty};

#[derive(Debug, Serialize)]
struct DataRow<'a> {
    dataset: usize,
    title: &'a str,
    x: f64,
    y: f64,
    sigma: f64,
    active: bool,
}

#[derive(Debug, Serialize)]
struct PeakExport<'a> {
    dataset: usize,
    title: &'a str,
    formula: &'a str,
    peaks: &'a PeakTable,
}

fn output_path(config: &ExportConfig, suffix: &str) -> PathBuf {
    let stem = config
        .session_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "session".to_string());
    config.output_dir.join(format!("{stem}_{suffix}"))
}

fn csv_writer(path: &Path) -> Result<csv::Writer<File>, AppError> {
    csv::Writer::from_path(path)
        .map_err(|e| AppError::new(2, format!("Failed to create export '{}': {e}", path.display())))
}

fn csv_error(path: &Path, e: impl std::fmt::Display) -> AppError {
    AppError::new(2, format!("Failed to write export '{}': {e}", path.display()))
}

/// Write one row per point of every dataset.
pub fn write_data_csv(path: &Path, parsed: &ParsedTemplate) -> Result<(), AppError> {
    let mut writer = csv_writer(path)?;
    for entry in &parsed.entries {
        for p in &entry.data.points {
            writer
                .serialize(DataRow {
                    dataset: entry.index,
                    title: &entry.title,
                    x: p.x,
                    y: p.y,
                    sigma: p.sigma,
                    active: p.active,
                })
                .map_err(|e| csv_error(path, e))?;
        }
    }
    writer.flush().map_err(|e| csv_error(path, e))
}

fn cell(v: Option<f64>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

/// Write one row per function; unknown values become empty cells.
pub fn write_peaks_csv(path: &Path, parsed: &ParsedTemplate) -> Result<(), AppError> {
    let with_errors = parsed.entries.iter().any(|e| e.peaks.with_errors);
    let max_extra = parsed.entries.iter().map(|e| e.peaks.max_extra()).max().unwrap_or(0);

    // Widest table decides the columns.
    let shape = PeakTable {
        records: parsed
            .entries
            .iter()
            .flat_map(|e| e.peaks.records.iter())
            .find(|r| r.extra.len() == max_extra)
            .cloned()
            .into_iter()
            .collect(),
        with_errors,
    };
    let mut header = vec!["dataset".to_string(), "title".to_string()];
    header.extend(shape.column_names());

    let mut writer = csv_writer(path)?;
    writer.write_record(&header).map_err(|e| csv_error(path, e))?;
    let value_columns = 4 + max_extra;
    for entry in &parsed.entries {
        for r in &entry.peaks.records {
            let mut row = vec![entry.index.to_string(), entry.title.clone(), r.id.clone(), r.type_name.clone()];
            let mut values: Vec<String> = vec![cell(r.center), cell(r.height), cell(r.area), cell(r.fwhm)];
            values.extend(r.extra.iter().map(|v| v.to_string()));
            values.resize(value_columns, String::new());
            row.extend(values);
            if with_errors {
                let mut errs: Vec<String> = r
                    .errors
                    .iter()
                    .flatten()
                    .map(|e| match e {
                        Uncertainty::Known(v) => v.to_string(),
                        Uncertainty::Unknown => String::new(),
                    })
                    .collect();
                errs.resize(value_columns, String::new());
                row.extend(errs);
            }
            writer.write_record(&row).map_err(|e| csv_error(path, e))?;
        }
    }
    writer.flush().map_err(|e| csv_error(path, e))
}

pub fn write_peaks_json(path: &Path, parsed: &ParsedTemplate) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create export '{}': {e}", path.display())))?;
    let payload: Vec<PeakExport<'_>> = parsed
        .entries
        .iter()
        .map(|e| PeakExport {
            dataset: e.index,
            title: &e.title,
            formula: &e.model_formula,
            peaks: &e.peaks,
        })
        .collect();
    serde_json::to_writer_pretty(file, &payload)
        .map_err(|e| AppError::new(2, format!("Failed to write export JSON '{}': {e}", path.display())))
}

/// Write the files selected by `config`; returns their paths.
pub fn export_session(config: &ExportConfig, parsed: &ParsedTemplate) -> Result<Vec<PathBuf>, AppError> {
    let mut written = Vec::new();
    if config.data {
        let path = output_path(config, "data.csv");
        write_data_csv(&path, parsed)?;
        written.push(path);
    }
    if config.peaks {
        let path = if config.json {
            let path = output_path(config, "peaks.json");
            write_peaks_json(&path, parsed)?;
            path
        } else {
            let path = output_path(config, "peaks.csv");
            write_peaks_csv(&path, parsed)?;
            path
        };
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, MemorySession};
    use crate::session::parse_session_text;

    fn parsed(with_errors: bool) -> ParsedTemplate {
        let mut s = MemorySession::new();
        s.load_dataset(0, &[0.0, 1.0, 2.0, 3.0], &[1.0, 3.0, 2.0, 1.1], &[], Some("a;b")).unwrap();
        s.set_point_active(0, 3, false).unwrap();
        s.set_model(0, "Gaussian(~3, ~1, ~0.8) + Linear(~0.1, 0)").unwrap();
        s.load_dataset(1, &[0.0, 1.0, 2.0, 3.0], &[0.0; 4], &[], Some("c;d")).unwrap();
        parse_session_text(&s.state_text(), &mut MemorySession::new(), with_errors).unwrap()
    }

    fn config(dir: &Path, json: bool) -> ExportConfig {
        ExportConfig {
            session_path: PathBuf::from("/data/run.fit"),
            output_dir: dir.to_path_buf(),
            errors: false,
            data: true,
            peaks: true,
            json,
        }
    }

    #[test]
    fn writes_data_and_peak_csv() {
        let dir = tempfile::tempdir().unwrap();
        let written = export_session(&config(dir.path(), false), &parsed(false)).unwrap();
        assert_eq!(written, vec![dir.path().join("run_data.csv"), dir.path().join("run_peaks.csv")]);

        let data = std::fs::read_to_string(&written[0]).unwrap();
        let lines: Vec<&str> = data.lines().collect();
        assert_eq!(lines[0], "dataset,title,x,y,sigma,active");
        assert_eq!(lines.len(), 1 + 8);
        assert_eq!(lines[4], "0,a;b,3.0,1.1,1.0,false");

        let peaks = std::fs::read_to_string(&written[1]).unwrap();
        let lines: Vec<&str> = peaks.lines().collect();
        assert_eq!(lines[0], "dataset,title,id,type,Center,Height,Area,FWHM,a1,a2,a3");
        assert_eq!(lines.len(), 3);
        assert!(lines[2].starts_with("0,a;b,_2,Linear,,,,,0.1,0,"));
    }

    #[test]
    fn error_columns_follow_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.csv");
        write_peaks_csv(&path, &parsed(true)).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let header: Vec<&str> = text.lines().next().unwrap().split(',').collect();
        assert_eq!(header.len(), 2 + 2 + 2 * 7);
        assert_eq!(header.last(), Some(&"a3_err"));
    }

    #[test]
    fn json_export_nests_tables() {
        let dir = tempfile::tempdir().unwrap();
        let written = export_session(&config(dir.path(), true), &parsed(false)).unwrap();
        let raw = std::fs::read_to_string(&written[1]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value.as_array().map(Vec::len), Some(2));
        assert_eq!(value[0]["peaks"]["records"][0]["type_name"], "Gaussian");
        assert_eq!(value[1]["formula"], "");
    }
}
