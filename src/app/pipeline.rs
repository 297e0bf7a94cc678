//! Shared pipeline logic behind the CLI subcommands.
//!
//! Each function takes a resolved config, does the file I/O and returns what
//! the caller prints. The workflows are:
//!
//! - map: read map + template -> match -> fit -> aggregate session
//! - export: parse session -> CSV/JSON files
//! - import: read map -> session file

use std::path::PathBuf;

use tracing::info;

use crate::domain::{ExportConfig, ImportConfig, RunConfig};
use crate::engine::{Engine, MemorySession};
use crate::error::AppError;
use crate::fit::{FitOrchestrator, RunSummary};
use crate::io::{export_session, load_map, read_map};
use crate::session::parse_session_file;

/// Run a batch fit and write its sessions.
pub fn run_map(config: &RunConfig) -> Result<RunSummary, AppError> {
    let map = read_map(&config.map_path, config.style)?;
    info!(spectra = map.len(), samples = map.x.len(), "map loaded");
    let template = std::fs::read_to_string(&config.template_path).map_err(|e| {
        AppError::new(
            2,
            format!("Failed to read template '{}': {e}", config.template_path.display()),
        )
    })?;

    let mut orchestrator = FitOrchestrator::<MemorySession>::new(config.clone())?;
    orchestrator.run(&template, &map)
}

/// Export a saved session's data and peak tables.
pub fn run_export(config: &ExportConfig) -> Result<Vec<PathBuf>, AppError> {
    let mut staging = MemorySession::new();
    let parsed = parse_session_file(&config.session_path, &mut staging, config.errors)?;
    info!(datasets = parsed.len(), "session parsed");
    export_session(config, &parsed)
}

/// Convert a map file into a session file; refuses to overwrite unless forced.
pub fn run_import(config: &ImportConfig) -> Result<PathBuf, AppError> {
    if config.output.exists() && !config.force {
        return Err(AppError::new(
            2,
            format!(
                "'{}' already exists; pass --force to overwrite",
                config.output.display()
            ),
        ));
    }
    let map = read_map(&config.map_path, config.style)?;
    let mut session = MemorySession::new();
    load_map(&mut session, &map)?;
    session.persist_state(&config.output)?;
    info!(path = %config.output.display(), datasets = map.len(), "session written");
    Ok(config.output.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MapStyle, PreprocessOptions};

    const MAP: &str = "h0\nh1\nh2\nh3\nh4\nh5\nh6\nh7\nh8\nh9\nh10\nh11\nh12\n\
                       \t0\t1\n\
                       \t0\t0\n\
                       0\t1\t9\n\
                       1\t0\t1\n\
                       2\t9\t0\n";

    #[test]
    fn import_then_map_then_export() {
        let dir = tempfile::tempdir().unwrap();
        let map_path = dir.path().join("scan.txt");
        std::fs::write(&map_path, MAP).unwrap();

        // Template: the imported map itself, with models added.
        let tpl_path = dir.path().join("tpl.fit");
        let import = ImportConfig {
            map_path: map_path.clone(),
            style: MapStyle::Jasko,
            output: tpl_path.clone(),
            force: false,
        };
        run_import(&import).unwrap();
        assert_eq!(run_import(&import).unwrap_err().exit_code(), 2);
        let mut tpl = MemorySession::new();
        tpl.run_script(&std::fs::read_to_string(&tpl_path).unwrap()).unwrap();
        tpl.set_model(0, "Quadratic(~0, ~0, ~1)").unwrap();
        tpl.set_model(1, "Linear(~9, ~-4)").unwrap();
        tpl.persist_state(&tpl_path).unwrap();

        let mut config = RunConfig::new(&map_path, &tpl_path);
        config.output = Some(dir.path().join("out.fit"));
        config.preprocess = PreprocessOptions::from_letters("n").unwrap();
        let summary = run_map(&config).unwrap();
        assert_eq!(summary.assignment, vec![0, 1]);
        assert_eq!(summary.fits_run, 2);
        assert_eq!(summary.output, Some(dir.path().join("out.fit")));

        let export = ExportConfig {
            session_path: dir.path().join("out.fit"),
            output_dir: dir.path().to_path_buf(),
            errors: false,
            data: true,
            peaks: true,
            json: false,
        };
        let written = run_export(&export).unwrap();
        assert_eq!(written.len(), 2);
        let peaks = std::fs::read_to_string(&written[1]).unwrap();
        assert!(peaks.contains("0;0 @ template 0"));
        assert!(peaks.contains("1;0 @ template 1"));
    }

    #[test]
    fn missing_template_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let map_path = dir.path().join("scan.txt");
        std::fs::write(&map_path, MAP).unwrap();
        let config = RunConfig::new(&map_path, dir.path().join("none.fit"));
        assert_eq!(run_map(&config).unwrap_err().exit_code(), 2);
    }
}
