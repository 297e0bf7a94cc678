//! Shared domain types.
//!
//! Measured data is kept in plain vectors and `nalgebra` matrices; configuration
//! structs are derived from CLI flags (plus defaults) by `app`.

use std::path::PathBuf;
use std::str::FromStr;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::spectra::metric::Metric;

/// One measured sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub sigma: f64,
    /// Inactive points are excluded from fitting but kept in the dataset.
    pub active: bool,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            sigma: 1.0,
            active: true,
        }
    }
}

/// One spectrum's points plus its title.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub title: String,
    pub points: Vec<Point>,
}

impl Dataset {
    pub fn ys(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.y).collect()
    }

    /// Indices of points excluded from fitting.
    pub fn inactive_indices(&self) -> Vec<usize> {
        self.points
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.active)
            .map(|(i, _)| i)
            .collect()
    }
}

/// A batch of spectra sharing one x axis.
///
/// `spectra` has one row per spectrum and one column per x sample.
#[derive(Debug, Clone)]
pub struct SpectralMap {
    pub x: Vec<f64>,
    pub labels: Vec<String>,
    pub spectra: DMatrix<f64>,
}

impl SpectralMap {
    pub fn len(&self) -> usize {
        self.spectra.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.spectra.nrows() == 0
    }

    pub fn spectrum(&self, i: usize) -> Vec<f64> {
        self.spectra.row(i).iter().copied().collect()
    }
}

/// Layout of the tabular map file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapStyle {
    /// Spectrometer export: 13 preamble lines, X/Y coordinate header rows,
    /// then one column per spectrum.
    Jasko,
}

impl FromStr for MapStyle {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jasko" => Ok(MapStyle::Jasko),
            other => Err(ConfigError::UnknownStyle(other.to_string())),
        }
    }
}

/// Default Savitzky–Golay window (samples).
pub const DEFAULT_SMOOTH_WINDOW: usize = 50;
/// Default Savitzky–Golay polynomial order.
pub const DEFAULT_SMOOTH_ORDER: usize = 2;

/// Which preprocessing stages run before template matching.
///
/// Stages always run in the order baseline → smooth → normalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessOptions {
    pub baseline: bool,
    pub smooth: bool,
    pub normalize: bool,
    pub window: usize,
    pub order: usize,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self::from_flag(false)
    }
}

impl PreprocessOptions {
    /// All stages on or all off.
    pub fn from_flag(enabled: bool) -> Self {
        Self {
            baseline: enabled,
            smooth: enabled,
            normalize: enabled,
            window: DEFAULT_SMOOTH_WINDOW,
            order: DEFAULT_SMOOTH_ORDER,
        }
    }

    /// Keyword form: `base`, `smooth` and `norm` anywhere in the string.
    pub fn from_tokens(tokens: &str) -> Self {
        let tokens = tokens.to_ascii_lowercase();
        Self {
            baseline: tokens.contains("base"),
            smooth: tokens.contains("smooth"),
            normalize: tokens.contains("norm"),
            ..Self::from_flag(false)
        }
    }

    /// CLI letter form: `b`, `s`, `n`, or `a` for all three.
    pub fn from_letters(letters: &str) -> Result<Self, ConfigError> {
        let mut tokens = String::new();
        for c in letters.chars().filter(|c| !c.is_whitespace()) {
            match c.to_ascii_lowercase() {
                'b' => tokens.push_str("base "),
                's' => tokens.push_str("smooth "),
                'n' => tokens.push_str("norm "),
                'a' => tokens.push_str("base smooth norm "),
                other => return Err(ConfigError::UnknownPreprocessKey(other)),
            }
        }
        Ok(Self::from_tokens(&tokens))
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    pub fn any(&self) -> bool {
        self.baseline || self.smooth || self.normalize
    }
}

/// A batch run's configuration as understood by the pipeline.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub map_path: PathBuf,
    pub template_path: PathBuf,
    pub style: MapStyle,

    /// Base output name; `None` disables all writes.
    pub output: Option<PathBuf>,
    /// Checkpoint every `split` spectra (0 disables splitting).
    pub split: usize,
    /// Run the optimizer on each spectrum.
    pub fit: bool,

    pub preprocess: PreprocessOptions,
    pub metric: Metric,

    /// Ask for uncertainty columns when reading template peak listings.
    pub template_errors: bool,

    pub verbose: bool,
    /// Engine cap on residual evaluations per fit.
    pub max_evaluations: usize,
}

impl RunConfig {
    /// Defaults matching the CLI, for library callers and tests.
    pub fn new(map_path: impl Into<PathBuf>, template_path: impl Into<PathBuf>) -> Self {
        Self {
            map_path: map_path.into(),
            template_path: template_path.into(),
            style: MapStyle::Jasko,
            output: None,
            split: 0,
            fit: true,
            preprocess: PreprocessOptions::default(),
            metric: Metric::Pearson,
            template_errors: false,
            verbose: false,
            max_evaluations: 100,
        }
    }
}

/// Options for exporting a saved session.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub session_path: PathBuf,
    pub output_dir: PathBuf,
    pub errors: bool,
    pub data: bool,
    pub peaks: bool,
    pub json: bool,
}

/// Options for turning a map file into a session file.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub map_path: PathBuf,
    pub style: MapStyle,
    pub output: PathBuf,
    pub force: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preprocess_from_tokens_and_letters() {
        let p = PreprocessOptions::from_tokens("base norm");
        assert!(p.baseline && p.normalize && !p.smooth);
        assert_eq!(p.window, DEFAULT_SMOOTH_WINDOW);

        let all = PreprocessOptions::from_letters("a").unwrap();
        assert_eq!(all, PreprocessOptions::from_flag(true));

        let sn = PreprocessOptions::from_letters("sn").unwrap();
        assert!(!sn.baseline && sn.smooth && sn.normalize);

        assert_eq!(
            PreprocessOptions::from_letters("bx"),
            Err(ConfigError::UnknownPreprocessKey('x'))
        );
        assert!(!PreprocessOptions::default().any());
    }

    #[test]
    fn map_style_parses_case_insensitively() {
        assert_eq!("JASKO".parse::<MapStyle>(), Ok(MapStyle::Jasko));
        assert!(matches!("csv".parse::<MapStyle>(), Err(ConfigError::UnknownStyle(_))));
    }

    #[test]
    fn inactive_indices_follow_mask() {
        let mut ds = Dataset::default();
        ds.points = vec![Point::new(0.0, 1.0), Point::new(1.0, 2.0), Point::new(2.0, 3.0)];
        ds.points[1].active = false;
        assert_eq!(ds.inactive_indices(), vec![1]);
        assert_eq!(ds.ys(), vec![1.0, 2.0, 3.0]);
    }
}
