//! Spectral map files.
//!
//! Jasko layout (tab separated):
//!
//! - 13 preamble lines (instrument metadata, ignored)
//! - a row with the X coordinate of every spectrum (first cell ignored)
//! - a row with the Y coordinate of every spectrum (first cell ignored)
//! - data rows: `axis<TAB>y_1<TAB>y_2 ...`
//!
//! Spectra are labelled `"<x>;<y>"` from their coordinates.

use std::path::Path;

use csv::StringRecord;
use nalgebra::DMatrix;

use crate::domain::{MapStyle, SpectralMap};
use crate::engine::Engine;
use crate::error::AppError;

const JASKO_PREAMBLE_LINES: usize = 13;

/// Read a map file.
pub fn read_map(path: &Path, style: MapStyle) -> Result<SpectralMap, AppError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| AppError::new(2, format!("Failed to open map '{}': {e}", path.display())))?;
    match style {
        MapStyle::Jasko => parse_jasko(&text)
            .map_err(|msg| AppError::new(3, format!("Invalid map '{}': {msg}", path.display()))),
    }
}

fn numeric_cells(record: &StringRecord, line: usize) -> Result<Vec<f64>, String> {
    record
        .iter()
        .skip(1)
        .filter(|cell| !cell.is_empty())
        .map(|cell| {
            cell.parse::<f64>()
                .map_err(|_| format!("line {line}: non-numeric value '{cell}'"))
        })
        .collect()
}

fn parse_jasko(text: &str) -> Result<SpectralMap, String> {
    let body: String = text
        .lines()
        .skip(JASKO_PREAMBLE_LINES)
        .collect::<Vec<_>>()
        .join("\n");

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());
    let mut records = reader.records();

    let first_line = JASKO_PREAMBLE_LINES + 1;
    let mut header = |offset: usize, what: &str| -> Result<Vec<f64>, String> {
        let record = records
            .next()
            .ok_or_else(|| format!("missing {what} coordinate row"))?
            .map_err(|e| format!("{what} coordinate row: {e}"))?;
        numeric_cells(&record, first_line + offset)
    };
    let xs = header(0, "X")?;
    let ys = header(1, "Y")?;
    if xs.len() != ys.len() {
        return Err(format!("{} X coordinates but {} Y coordinates", xs.len(), ys.len()));
    }
    let n_spectra = xs.len();
    if n_spectra == 0 {
        return Err("no spectra in coordinate rows".to_string());
    }

    let mut axis = Vec::new();
    let mut columns: Vec<f64> = Vec::new();
    for (idx, result) in records.enumerate() {
        let line = first_line + 2 + idx;
        let record = result.map_err(|e| format!("line {line}: {e}"))?;
        let Some(first) = record.get(0).filter(|c| !c.is_empty()) else {
            continue;
        };
        let x: f64 = first
            .parse()
            .map_err(|_| format!("line {line}: non-numeric axis value '{first}'"))?;
        let values = numeric_cells(&record, line)?;
        if values.len() != n_spectra {
            return Err(format!("line {line}: expected {n_spectra} values, found {}", values.len()));
        }
        axis.push(x);
        columns.extend(values);
    }
    if axis.is_empty() {
        return Err("no data rows".to_string());
    }

    // `columns` is sample-major; spectra are rows of the matrix.
    let spectra = DMatrix::from_row_slice(axis.len(), n_spectra, &columns).transpose();
    let labels = xs.iter().zip(&ys).map(|(x, y)| format!("{x};{y}")).collect();
    Ok(SpectralMap {
        x: axis,
        labels,
        spectra,
    })
}

/// Append every spectrum of `map` to `engine` as a titled dataset.
pub fn load_map<E: Engine>(engine: &mut E, map: &SpectralMap) -> Result<(), AppError> {
    for (i, label) in map.labels.iter().enumerate() {
        let index = engine.dataset_count();
        engine.load_dataset(index, &map.x, &map.spectrum(i), &[], Some(label))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemorySession;

    fn jasko_text() -> String {
        let mut text = String::new();
        for i in 0..JASKO_PREAMBLE_LINES {
            text.push_str(&format!("META{i}\tvalue\n"));
        }
        text.push_str("\t0\t1.5\t0\n");
        text.push_str("\t0\t0\t2\n");
        text.push_str("100\t1\t4\t7\n");
        text.push_str("101\t2\t5\t8\n");
        text.push_str("102\t3\t6\t9\n");
        text
    }

    #[test]
    fn parses_jasko_layout() {
        let map = parse_jasko(&jasko_text()).unwrap();
        assert_eq!(map.x, vec![100.0, 101.0, 102.0]);
        assert_eq!(map.labels, vec!["0;0", "1.5;0", "0;2"]);
        assert_eq!(map.len(), 3);
        assert_eq!(map.spectrum(1), vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn rejects_ragged_rows() {
        let text = jasko_text().replace("101\t2\t5\t8", "101\t2\t5");
        let err = parse_jasko(&text).unwrap_err();
        assert!(err.contains("line 17"), "{err}");
        assert!(parse_jasko("too short\n").is_err());
    }

    #[test]
    fn reads_file_and_loads_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.txt");
        std::fs::write(&path, jasko_text()).unwrap();
        let map = read_map(&path, MapStyle::Jasko).unwrap();

        let mut s = MemorySession::new();
        load_map(&mut s, &map).unwrap();
        assert_eq!(s.dataset_count(), 3);
        assert_eq!(s.dataset_title(2).unwrap(), "0;2");
        assert_eq!(s.point(2, 0).unwrap().y, 7.0);

        let missing = read_map(&dir.path().join("nope.txt"), MapStyle::Jasko).unwrap_err();
        assert_eq!(missing.exit_code(), 2);
    }
}
