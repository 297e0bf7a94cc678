//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - turns parsed CLI arguments into config structs
//! - runs the map / export / import pipelines
//! - prints reports

use std::path::{Path, PathBuf};

use crate::cli::{Cli, Command, ExportArgs, ImportArgs, MapArgs};
use crate::domain::{ExportConfig, ImportConfig, PreprocessOptions, RunConfig};
use crate::error::AppError;

pub mod pipeline;

/// Entry point for the `fitmap` binary.
pub fn run(cli: Cli) -> Result<(), AppError> {
    match cli.command {
        Command::Map(args) => handle_map(&args),
        Command::Export(args) => handle_export(&args),
        Command::Import(args) => handle_import(&args),
    }
}

fn handle_map(args: &MapArgs) -> Result<(), AppError> {
    let config = run_config_from_args(args)?;
    let summary = pipeline::run_map(&config)?;
    println!("{}", crate::report::format_run_summary(&summary, &config));
    Ok(())
}

fn handle_export(args: &ExportArgs) -> Result<(), AppError> {
    let config = export_config_from_args(args);
    let written = pipeline::run_export(&config)?;
    print!("{}", crate::report::format_written(&written));
    Ok(())
}

fn handle_import(args: &ImportArgs) -> Result<(), AppError> {
    let config = import_config_from_args(args);
    let written = pipeline::run_import(&config)?;
    print!("{}", crate::report::format_written(&[written]));
    Ok(())
}

fn default_session_path(map: &Path) -> PathBuf {
    map.with_extension("fit")
}

/// Resolve `map` arguments. Invalid preprocess letters or metric names fail here.
pub fn run_config_from_args(args: &MapArgs) -> Result<RunConfig, AppError> {
    let preprocess = PreprocessOptions::from_letters(&args.match_preprocess)?.with_window(args.smooth_window);
    let metric = args.match_method.parse()?;
    Ok(RunConfig {
        map_path: args.file.clone(),
        template_path: args.template.clone(),
        style: args.style,
        output: Some(args.out.clone().unwrap_or_else(|| default_session_path(&args.file))),
        split: args.split,
        fit: !args.nofit,
        preprocess,
        metric,
        template_errors: args.errors,
        verbose: args.verbose,
        max_evaluations: args.max_evaluations,
    })
}

pub fn export_config_from_args(args: &ExportArgs) -> ExportConfig {
    let output_dir = args.output.clone().unwrap_or_else(|| {
        args.session
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    });
    ExportConfig {
        session_path: args.session.clone(),
        output_dir,
        errors: args.errors,
        data: !args.peaks_only,
        peaks: !args.data_only,
        json: args.json,
    }
}

pub fn import_config_from_args(args: &ImportArgs) -> ImportConfig {
    ImportConfig {
        map_path: args.file.clone(),
        style: args.style,
        output: args.out.clone().unwrap_or_else(|| default_session_path(&args.file)),
        force: args.force,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectra::Metric;
    use clap::Parser;

    fn map_args(extra: &[&str]) -> MapArgs {
        let mut argv = vec!["fitmap", "map", "data/scan.txt", "tpl.fit"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Command::Map(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn map_defaults() {
        let config = run_config_from_args(&map_args(&[])).unwrap();
        assert_eq!(config.output, Some(PathBuf::from("data/scan.fit")));
        assert_eq!(config.metric, Metric::Pearson);
        assert!(config.fit);
        assert!(!config.preprocess.any());
        assert_eq!(config.max_evaluations, 100);
    }

    #[test]
    fn bad_options_are_configuration_errors() {
        let err = run_config_from_args(&map_args(&["--match-method", "hamming"])).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        let err = run_config_from_args(&map_args(&["--match-preprocess", "bq"])).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn export_selection_flags() {
        let Command::Export(args) = Cli::parse_from(["fitmap", "export", "/tmp/run.fit", "--peaks-only"]).command
        else {
            panic!("expected export");
        };
        let config = export_config_from_args(&args);
        assert!(!config.data && config.peaks);
        assert_eq!(config.output_dir, PathBuf::from("/tmp"));
    }
}
