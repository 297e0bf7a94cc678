//! Nearest-template assignment.

use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::Serialize;

use crate::error::ShapeMismatch;
use crate::spectra::metric::Metric;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    /// Template index per input row.
    pub assignment: Vec<usize>,
    /// Distance to the chosen template (NaN only when every template was NaN).
    pub distances: Vec<f64>,
}

impl MatchResult {
    /// How many inputs were assigned to each of `templates` templates.
    pub fn usage(&self, templates: usize) -> Vec<usize> {
        let mut counts = vec![0; templates];
        for &k in &self.assignment {
            if let Some(c) = counts.get_mut(k) {
                *c += 1;
            }
        }
        counts
    }
}

/// Index and value of the smallest distance; NaN never beats a finite value and
/// ties keep the lowest index.
fn argmin(distances: &[f64]) -> (usize, f64) {
    let mut best = (0, f64::NAN);
    for (k, &d) in distances.iter().enumerate() {
        if d.is_nan() {
            continue;
        }
        if best.1.is_nan() || d < best.1 {
            best = (k, d);
        }
    }
    best
}

/// Assign every row of `inputs` to its closest row of `templates`.
pub fn match_templates(
    inputs: &DMatrix<f64>,
    templates: &DMatrix<f64>,
    metric: Metric,
) -> Result<MatchResult, ShapeMismatch> {
    if templates.nrows() == 0 {
        return Err(ShapeMismatch::NoTemplates);
    }
    if inputs.ncols() != templates.ncols() {
        return Err(ShapeMismatch::Length {
            input: inputs.ncols(),
            template: templates.ncols(),
        });
    }

    let template_rows: Vec<Vec<f64>> = (0..templates.nrows())
        .map(|k| templates.row(k).iter().copied().collect())
        .collect();

    let (assignment, distances): (Vec<usize>, Vec<f64>) = (0..inputs.nrows())
        .into_par_iter()
        .map(|i| {
            let row: Vec<f64> = inputs.row(i).iter().copied().collect();
            let d: Vec<f64> = template_rows.iter().map(|t| metric.distance(&row, t)).collect();
            argmin(&d)
        })
        .unzip();

    Ok(MatchResult { assignment, distances })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectra::metric::PairwiseMetric;

    fn templates() -> DMatrix<f64> {
        DMatrix::from_row_slice(3, 3, &[0.0, 0.0, 10.0, 10.0, 0.0, 0.0, 0.0, 10.0, 0.0])
    }

    #[test]
    fn picks_the_closest_template() {
        let inputs = DMatrix::from_row_slice(2, 3, &[1.0, 0.0, 9.0, 0.0, 8.0, 1.0]);
        for metric in [Metric::Pearson, Metric::Pairwise(PairwiseMetric::Euclidean)] {
            let res = match_templates(&inputs, &templates(), metric).unwrap();
            assert_eq!(res.assignment, vec![0, 2], "{metric}");
        }
    }

    #[test]
    fn exact_copy_has_zero_distance() {
        let t = templates();
        let res = match_templates(&t, &t, Metric::Pearson).unwrap();
        assert_eq!(res.assignment, vec![0, 1, 2]);
        assert!(res.distances.iter().all(|d| d.abs() < 1e-12));
        assert_eq!(res.usage(3), vec![1, 1, 1]);
    }

    #[test]
    fn ties_and_nan() {
        assert_eq!(argmin(&[2.0, 1.0, 1.0]), (1, 1.0));
        assert_eq!(argmin(&[f64::NAN, 3.0, f64::NAN]), (1, 3.0));
        let (k, d) = argmin(&[f64::NAN, f64::NAN]);
        assert_eq!(k, 0);
        assert!(d.is_nan());
    }

    #[test]
    fn shape_errors() {
        let inputs = DMatrix::from_row_slice(1, 2, &[1.0, 2.0]);
        assert_eq!(
            match_templates(&inputs, &templates(), Metric::Pearson),
            Err(ShapeMismatch::Length { input: 2, template: 3 })
        );
        let empty = DMatrix::<f64>::zeros(0, 2);
        assert_eq!(
            match_templates(&inputs, &empty, Metric::Pearson),
            Err(ShapeMismatch::NoTemplates)
        );
    }
}
