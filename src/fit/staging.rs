//! Single-dataset scratch session reused for every spectrum of a run.

use crate::engine::{Component, Engine, EngineError};

/// Owns a pooled engine. Every [`StagingSession::stage`] starts from
/// [`StagingSession::reset`], so no dataset, mask or model survives from the
/// previous spectrum. Function-type definitions and options are kept.
#[derive(Debug, Default)]
pub struct StagingSession<E: Engine> {
    engine: E,
}

impl<E: Engine> StagingSession<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Drop all datasets, functions and variables.
    pub fn reset(&mut self) {
        self.engine.reset();
    }

    /// Load one spectrum as dataset `@0`, deactivate `inactive` points and
    /// install `formula` (skipped when empty).
    pub fn stage(&mut self, x: &[f64], y: &[f64], inactive: &[usize], formula: &str) -> Result<(), EngineError> {
        self.reset();
        self.engine.load_dataset(0, x, y, &[], None)?;
        for &i in inactive {
            self.engine.set_point_active(0, i, false)?;
        }
        if !formula.is_empty() {
            self.engine.set_model(0, formula)?;
        }
        Ok(())
    }

    pub fn fit(&mut self) -> Result<(), EngineError> {
        self.engine.run_fit(0)
    }

    pub fn components(&self) -> Result<Vec<Component>, EngineError> {
        self.engine.components(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemorySession;

    #[test]
    fn stage_starts_from_a_clean_session() {
        let mut s = StagingSession::new(MemorySession::new());
        s.stage(&[0.0, 1.0, 2.0], &[1.0, 2.0, 3.0], &[1], "Constant(~1)").unwrap();
        assert!(!s.engine().point(0, 1).unwrap().active);
        assert_eq!(s.components().unwrap().len(), 1);

        s.stage(&[0.0, 1.0, 2.0], &[1.0, 2.0, 3.0], &[], "").unwrap();
        assert_eq!(s.engine().dataset_count(), 1);
        assert!(s.engine().points(0).unwrap().iter().all(|p| p.active));
        assert!(s.components().unwrap().is_empty());
    }

    #[test]
    fn definitions_survive_reset() {
        let mut s = StagingSession::new(MemorySession::new());
        s.engine_mut().define_function_type("define Flat(a) = a").unwrap();
        s.reset();
        assert!(s.engine().has_function_type("Flat"));
        assert_eq!(s.engine().dataset_count(), 0);
    }
}
