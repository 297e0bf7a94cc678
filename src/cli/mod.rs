//! Command-line parsing for the spectral map fitter.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! fitting pipeline; `app` turns these structs into plain config values.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::{DEFAULT_SMOOTH_WINDOW, MapStyle};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "fitmap", version, about = "Template-based peak fitting for spectral maps")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Whether the selected subcommand asked for verbose output.
    pub fn verbose(&self) -> bool {
        match &self.command {
            Command::Map(args) => args.verbose,
            Command::Export(_) | Command::Import(_) => false,
        }
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit every spectrum of a map with the closest dataset of a template session.
    Map(MapArgs),
    /// Export data points and peak tables of a saved session.
    Export(ExportArgs),
    /// Convert a map file into a session file.
    Import(ImportArgs),
}

#[derive(Debug, Args, Clone)]
pub struct MapArgs {
    /// Map file with the spectra to fit.
    pub file: PathBuf,

    /// Session file whose datasets (and models) serve as templates.
    pub template: PathBuf,

    /// Output session. Defaults to the map file with a `.fit` extension.
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Map file layout.
    #[arg(long, default_value = "jasko")]
    pub style: MapStyle,

    /// Report optimizer progress and debug logs.
    #[arg(short, long)]
    pub verbose: bool,

    /// Preprocessing before matching: any of `b` (baseline), `s` (smooth), `n` (normalize), `a` (all).
    #[arg(long = "match-preprocess", default_value = "")]
    pub match_preprocess: String,

    /// Distance used to pick a template (pearsonr, euclidean, cosine, ...).
    #[arg(long = "match-method", default_value = "pearsonr")]
    pub match_method: String,

    /// Write a checkpoint session every N spectra (0 = only the final file).
    #[arg(long, default_value_t = 0)]
    pub split: usize,

    /// Copy the matched models without running the optimizer.
    #[arg(long)]
    pub nofit: bool,

    /// Savitzky–Golay window used by `--match-preprocess s`.
    #[arg(long = "smooth-window", default_value_t = DEFAULT_SMOOTH_WINDOW)]
    pub smooth_window: usize,

    /// Cap on residual evaluations per fit.
    #[arg(long = "max-evaluations", default_value_t = 100)]
    pub max_evaluations: usize,

    /// Read template peak tables with uncertainties.
    #[arg(long)]
    pub errors: bool,
}

#[derive(Debug, Args, Clone)]
pub struct ExportArgs {
    /// Session file to export.
    pub session: PathBuf,

    /// Output directory (defaults to the session's directory).
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Include parameter uncertainties in the peak table.
    #[arg(long)]
    pub errors: bool,

    /// Only write the data points.
    #[arg(long = "data-only", conflicts_with = "peaks_only")]
    pub data_only: bool,

    /// Only write the peak table.
    #[arg(long = "peaks-only")]
    pub peaks_only: bool,

    /// Write the peak table as JSON instead of CSV.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args, Clone)]
pub struct ImportArgs {
    /// Map file to convert.
    pub file: PathBuf,

    /// Map file layout.
    #[arg(long, default_value = "jasko")]
    pub style: MapStyle,

    /// Output session. Defaults to the map file with a `.fit` extension.
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Overwrite an existing output file.
    #[arg(long)]
    pub force: bool,
}
