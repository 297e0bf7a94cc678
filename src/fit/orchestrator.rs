//! Batch run: match every spectrum of a map to a template dataset, fit the
//! template's model to it and collect the results in one aggregate session.
//!
//! Phases:
//!
//! - reset both sessions, so a run never carries datasets of an earlier one
//! - load the template session, refuse models the engine rejected, install custom function types
//! - validate shapes, preprocess and match (no output is touched before this succeeds)
//! - per spectrum: stage, fit, merge into the aggregate session, checkpoint
//! - write the final snapshot

use std::path::PathBuf;

use nalgebra::DMatrix;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{RunConfig, SpectralMap};
use crate::engine::{Engine, defined_type_name};
use crate::error::{AppError, ShapeMismatch};
use crate::fit::checkpoint::{checkpoint_path, final_path, is_checkpoint, write_snapshot};
use crate::fit::staging::StagingSession;
use crate::session::{ParseAnomaly, ParsedTemplate, parse_session_text};
use crate::spectra::{MatchResult, match_templates, preprocess};

/// What a run did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub spectra: usize,
    pub templates: usize,
    pub fits_run: usize,
    /// Fits the optimizer rejected; those spectra keep the template's model.
    pub fits_failed: usize,
    /// Spectra assigned to each template.
    pub template_usage: Vec<usize>,
    pub checkpoints: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    pub anomalies: usize,
    pub assignment: Vec<usize>,
}

pub struct FitOrchestrator<E: Engine + Default> {
    config: RunConfig,
    aggregate: E,
    staging: StagingSession<E>,
}

impl<E: Engine + Default> FitOrchestrator<E> {
    /// Create both sessions and apply the engine options of `config`.
    pub fn new(config: RunConfig) -> Result<Self, AppError> {
        let mut aggregate = E::default();
        let mut staging = StagingSession::new(E::default());
        let verbosity = if config.verbose { "0" } else { "-1" };
        let evaluations = config.max_evaluations.to_string();
        for engine in [&mut aggregate, staging.engine_mut()] {
            engine.set_option("verbosity", verbosity)?;
            engine.set_option("max_wssr_evaluations", &evaluations)?;
        }
        Ok(Self {
            config,
            aggregate,
            staging,
        })
    }

    pub fn aggregate(&self) -> &E {
        &self.aggregate
    }

    pub fn into_aggregate(self) -> E {
        self.aggregate
    }

    /// Run the whole batch against `template_text`.
    pub fn run(&mut self, template_text: &str, map: &SpectralMap) -> Result<RunSummary, AppError> {
        self.aggregate.reset();
        self.staging.reset();

        let mut parser_engine = E::default();
        let template = parse_session_text(template_text, &mut parser_engine, self.config.template_errors)?;
        info!(
            datasets = template.len(),
            anomalies = template.anomalies.len(),
            "template loaded"
        );
        check_models(&template)?;
        self.install_defines(&template)?;

        let matched = self.match_spectra(&template, map)?;

        let mut summary = RunSummary {
            spectra: map.len(),
            templates: template.len(),
            template_usage: matched.usage(template.len()),
            anomalies: template.anomalies.len(),
            assignment: matched.assignment.clone(),
            ..RunSummary::default()
        };

        for (i, &k) in matched.assignment.iter().enumerate() {
            let entry = &template.entries[k];
            let inactive = entry.data.inactive_indices();
            let y = map.spectrum(i);

            self.staging.stage(&map.x, &y, &inactive, &entry.model_formula)?;
            if self.config.fit && !entry.model_formula.is_empty() {
                match self.staging.fit() {
                    Ok(()) => summary.fits_run += 1,
                    Err(e) => {
                        warn!(spectrum = i, label = %map.labels[i], error = %e, "fit skipped; keeping template model");
                        summary.fits_failed += 1;
                    }
                }
            }

            let title = format!("{} @ template {k}", map.labels[i]);
            let ds = self.aggregate.dataset_count();
            self.aggregate.load_dataset(ds, &map.x, &y, &[], Some(&title))?;
            for &p in &inactive {
                self.aggregate.set_point_active(ds, p, false)?;
            }
            self.aggregate.clear_model(ds)?;
            let expressions: Vec<String> = self.staging.components()?.iter().map(|c| c.expression()).collect();
            if !expressions.is_empty() {
                self.aggregate.set_model(ds, &expressions.join(" + "))?;
            }
            debug!(spectrum = i, template = k, distance = matched.distances[i], "spectrum merged");

            let processed = i + 1;
            if let Some(base) = &self.config.output {
                if is_checkpoint(processed, self.config.split) {
                    let path = checkpoint_path(base, processed);
                    write_snapshot(&self.aggregate, &path)?;
                    summary.checkpoints.push(path);
                }
            }
        }

        if let Some(base) = &self.config.output {
            let path = final_path(base, self.config.split);
            write_snapshot(&self.aggregate, &path)?;
            summary.output = Some(path);
        }
        info!(
            spectra = summary.spectra,
            fits = summary.fits_run,
            failed = summary.fits_failed,
            "batch finished"
        );
        Ok(summary)
    }

    fn install_defines(&mut self, template: &ParsedTemplate) -> Result<(), AppError> {
        for define in &template.defines {
            let Some(name) = defined_type_name(define) else {
                continue;
            };
            for engine in [&mut self.aggregate, self.staging.engine_mut()] {
                if !engine.has_function_type(name) {
                    engine.define_function_type(define)?;
                }
            }
        }
        Ok(())
    }

    /// Shape checks, preprocessing and matching. Nothing is written here.
    fn match_spectra(&self, template: &ParsedTemplate, map: &SpectralMap) -> Result<MatchResult, AppError> {
        if template.is_empty() {
            return Err(ShapeMismatch::NoTemplates.into());
        }
        if map.labels.len() != map.len() {
            return Err(ShapeMismatch::Labels {
                labels: map.labels.len(),
                spectra: map.len(),
            }
            .into());
        }
        let width = map.spectra.ncols();
        if let Some(bad) = template.entries.iter().find(|e| e.data.points.len() != width) {
            return Err(ShapeMismatch::Length {
                input: width,
                template: bad.data.points.len(),
            }
            .into());
        }

        let rows: Vec<Vec<f64>> = template.entries.iter().map(|e| e.data.ys()).collect();
        let templates = DMatrix::from_fn(rows.len(), width, |r, c| rows[r][c]);

        let opts = &self.config.preprocess;
        let inputs = preprocess(&map.spectra, opts)?;
        let templates = preprocess(&templates, opts)?;
        let matched = match_templates(&inputs, &templates, self.config.metric)?;
        info!(
            spectra = map.len(),
            templates = template.len(),
            metric = %self.config.metric,
            "spectra matched"
        );
        Ok(matched)
    }
}

/// Fails on the first template model the engine rejected during parsing.
fn check_models(template: &ParsedTemplate) -> Result<(), AppError> {
    let rejected = template
        .anomalies
        .iter()
        .find(|a| matches!(a, ParseAnomaly::RejectedModel { .. }));
    match rejected {
        Some(anomaly) => Err(AppError::new(3, format!("Unusable template: {anomaly}"))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemorySession;
    use crate::session::parse_session_file;

    fn template_text() -> String {
        let mut s = MemorySession::new();
        let x = [0.0, 1.0, 2.0];
        s.load_dataset(0, &x, &[0.0, 0.0, 10.0], &[], Some("t0")).unwrap();
        s.load_dataset(1, &x, &[10.0, 0.0, 0.0], &[], Some("t1")).unwrap();
        s.load_dataset(2, &x, &[0.0, 10.0, 0.0], &[], Some("t2")).unwrap();
        s.set_point_active(1, 2, false).unwrap();
        s.set_model(0, "Quadratic(~0, ~0, ~2)").unwrap();
        s.set_model(1, "Linear(~10, ~-10)").unwrap();
        s.set_model(2, "Constant(3)").unwrap();
        s.state_text()
    }

    fn map(rows: &[[f64; 3]]) -> SpectralMap {
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        SpectralMap {
            x: vec![0.0, 1.0, 2.0],
            labels: (0..rows.len()).map(|i| format!("{i};0")).collect(),
            spectra: DMatrix::from_row_slice(rows.len(), 3, &flat),
        }
    }

    #[test]
    fn matches_fits_and_merges() {
        let mut orch = FitOrchestrator::<MemorySession>::new(RunConfig::new("map.txt", "t.fit")).unwrap();
        let summary = orch
            .run(&template_text(), &map(&[[1.0, 0.0, 9.0], [9.0, 1.0, 0.0], [0.0, 9.0, 1.0]]))
            .unwrap();
        assert_eq!(summary.assignment, vec![0, 1, 2]);
        assert_eq!(summary.template_usage, vec![1, 1, 1]);
        assert_eq!(summary.fits_run, 2);
        assert_eq!(summary.fits_failed, 1);
        assert_eq!(summary.output, None);

        let agg = orch.aggregate();
        assert_eq!(agg.dataset_count(), 3);
        assert_eq!(agg.dataset_title(0).unwrap(), "0;0 @ template 0");
        // Quadratic through three points fits exactly.
        let q = agg.components(0).unwrap();
        assert!(q[0].params.iter().all(|p| p.unlocked));
        assert!((q[0].params[0].value - 1.0).abs() < 1e-6);
        // Mask copied from template 1.
        assert!(!agg.point(1, 2).unwrap().active);
        assert!(agg.point(0, 2).unwrap().active);
        // Locked template model is kept as is.
        assert_eq!(agg.components(2).unwrap()[0].expression(), "Constant(3)");
    }

    #[test]
    fn nofit_keeps_template_values() {
        let mut config = RunConfig::new("map.txt", "t.fit");
        config.fit = false;
        let mut orch = FitOrchestrator::<MemorySession>::new(config).unwrap();
        let summary = orch.run(&template_text(), &map(&[[1.0, 0.0, 9.0]])).unwrap();
        assert_eq!(summary.fits_run + summary.fits_failed, 0);
        assert_eq!(
            orch.aggregate().components(0).unwrap()[0].expression(),
            "Quadratic(~0, ~0, ~2)"
        );
    }

    #[test]
    fn checkpoints_every_split() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("out.fit");
        let mut config = RunConfig::new("map.txt", "t.fit");
        config.output = Some(base.clone());
        config.split = 2;
        config.fit = false;
        let rows = [[1.0, 0.0, 9.0]; 5];
        let mut orch = FitOrchestrator::<MemorySession>::new(config).unwrap();
        let summary = orch.run(&template_text(), &map(&rows)).unwrap();

        assert_eq!(
            summary.checkpoints,
            vec![dir.path().join("out_2.fit"), dir.path().join("out_4.fit")]
        );
        assert_eq!(summary.output, Some(dir.path().join("out_final.fit")));
        assert!(!base.exists());

        for (i, path) in summary.checkpoints.iter().enumerate() {
            let parsed = parse_session_file(path, &mut MemorySession::new(), false).unwrap();
            assert_eq!(parsed.len(), (i + 1) * 2);
        }
        let last = parse_session_file(&dir.path().join("out_final.fit"), &mut MemorySession::new(), false).unwrap();
        assert_eq!(last.len(), 5);
        assert_eq!(last.entries[4].title, "4;0 @ template 0");
        assert_eq!(last.entries[4].model_formula, "Quadratic(~0, ~0, ~2)");
    }

    #[test]
    fn shape_mismatch_aborts_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RunConfig::new("map.txt", "t.fit");
        config.output = Some(dir.path().join("out.fit"));
        let bad = SpectralMap {
            x: vec![0.0, 1.0],
            labels: vec!["0;0".into()],
            spectra: DMatrix::from_row_slice(1, 2, &[1.0, 2.0]),
        };
        let mut orch = FitOrchestrator::<MemorySession>::new(config).unwrap();
        let err = orch.run(&template_text(), &bad).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(orch.aggregate().dataset_count(), 0);
    }

    #[test]
    fn custom_types_are_installed_once() {
        let mut s = MemorySession::new();
        s.define_function_type("define Flat(level) = level").unwrap();
        s.load_dataset(0, &[0.0, 1.0, 2.0], &[2.0, 2.0, 2.0], &[], None).unwrap();
        s.set_model(0, "Flat(~1)").unwrap();
        let text = s.state_text();

        let mut orch = FitOrchestrator::<MemorySession>::new(RunConfig::new("m", "t")).unwrap();
        orch.run(&text, &map(&[[2.0, 2.0, 2.0]])).unwrap();
        orch.run(&text, &map(&[[2.0, 2.0, 2.0]])).unwrap();
        assert_eq!(orch.aggregate().dataset_count(), 1);
        assert!(orch.aggregate().has_function_type("Flat"));
        let flat = &orch.aggregate().components(0).unwrap()[0];
        assert!((flat.params[0].value - 2.0).abs() < 1e-6);
    }

    const TWO_TEMPLATES: &str = "\
# ------------  datasets  ------------
@+ = 0
M=3 in @0
X[0]=0, Y[0]=0, S[0]=1, A[0]=1 in @0
X[1]=1, Y[1]=0, S[1]=1, A[1]=1 in @0
X[2]=2, Y[2]=10, S[2]=1, A[2]=1 in @0
@+ = 0
M=3 in @1
X[0]=0, Y[0]=10, S[0]=1, A[0]=1 in @1
X[1]=1, Y[1]=0, S[1]=1, A[1]=1 in @1
X[2]=2, Y[2]=0, S[2]=1, A[2]=1 in @1
# ------------  variables and functions  ------------
$_1 = ~1
%_1 = Constant($_1)
%_2 = Constant($_9)
# ------------  models  ------------
@0: F = %_1
@1: F = %_2
";

    fn split_config(dir: &std::path::Path) -> RunConfig {
        let mut config = RunConfig::new("map.txt", "t.fit");
        config.output = Some(dir.join("out.fit"));
        config.split = 1;
        config
    }

    #[test]
    fn rejected_template_model_aborts_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = FitOrchestrator::<MemorySession>::new(split_config(dir.path())).unwrap();
        let err = orch
            .run(TWO_TEMPLATES, &map(&[[0.0, 1.0, 9.0], [9.0, 1.0, 0.0]]))
            .unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("@1"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(orch.aggregate().dataset_count(), 0);
    }

    #[test]
    fn failed_template_replay_aborts_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let broken = TWO_TEMPLATES.replace("X[2]=2, Y[2]=0, S[2]=1, A[2]=1 in @1", "X[7]=2, Y[7]=0 in @1");
        let mut orch = FitOrchestrator::<MemorySession>::new(split_config(dir.path())).unwrap();
        let err = orch.run(&broken, &map(&[[0.0, 1.0, 9.0]])).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().starts_with("Template replay failed"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
