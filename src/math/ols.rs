//! Least squares solver for small polynomial fits.
//!
//! Used when extrapolating the smoothing polynomial over the first and last
//! window of a spectrum:
//!
//! ```text
//! minimize Σ (y_i - x_i^T β)^2
//! ```
//!
//! SVD handles the tall design matrices (window rows, order+1 columns) without
//! requiring a square system.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Progressively looser tolerances for nearly collinear columns
    // (large offsets with high polynomial orders).
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Vandermonde design matrix with rows `[1, t, t^2, ...]`.
pub fn polynomial_design(ts: &[f64], order: usize) -> DMatrix<f64> {
    DMatrix::from_fn(ts.len(), order + 1, |r, c| ts[r].powi(c as i32))
}

/// Evaluate `β0 + β1 t + β2 t^2 + ...`.
pub fn eval_polynomial(beta: &DVector<f64>, t: f64) -> f64 {
    beta.iter().rev().fold(0.0, |acc, b| acc * t + b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_recovers_quadratic() {
        let ts = [0.0, 1.0, 2.0, 3.0];
        let ys: Vec<f64> = ts.iter().map(|t| 1.0 - 2.0 * t + 0.5 * t * t).collect();
        let beta = solve_least_squares(&polynomial_design(&ts, 2), &DVector::from_vec(ys)).unwrap();
        assert!((beta[0] - 1.0).abs() < 1e-10);
        assert!((beta[1] + 2.0).abs() < 1e-10);
        assert!((beta[2] - 0.5).abs() < 1e-10);
        assert!((eval_polynomial(&beta, 4.0) - 1.0).abs() < 1e-9);
    }
}
