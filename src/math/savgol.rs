//! Savitzky–Golay smoothing.
//!
//! Every interior sample is replaced by the value, at that sample, of the
//! polynomial fitted over a window around it. The window is centered when its
//! length is odd and starts `(window - 1) / 2` samples to the left otherwise.
//! Samples too close to either end take the value of the polynomial fitted to
//! the first (or last) full window.

use nalgebra::{DMatrix, DVector};

use crate::math::ols::{eval_polynomial, polynomial_design, solve_least_squares};

/// Convolution weights giving the smoothed value at the window's anchor.
///
/// Returns `None` when the normal equations are singular (`window <= order`).
pub fn savgol_weights(window: usize, order: usize) -> Option<Vec<f64>> {
    let half = (window - 1) / 2;
    let ts: Vec<f64> = (0..window).map(|j| j as f64 - half as f64).collect();
    let a = polynomial_design(&ts, order);
    let at = a.transpose();
    let inv = (&at * &a).try_inverse()?;
    let proj: DMatrix<f64> = inv * at;
    Some(proj.row(0).iter().copied().collect())
}

/// Smooth one spectrum. The caller guarantees `window <= y.len()` and `window > order`.
pub fn savgol_smooth(y: &[f64], window: usize, order: usize) -> Option<Vec<f64>> {
    let n = y.len();
    let half = (window - 1) / 2;
    let weights = savgol_weights(window, order)?;
    let mut out = vec![0.0; n];

    // Anchor positions whose full window lies inside the spectrum.
    let first = half;
    let last = n - window + half;
    for i in first..=last {
        let start = i - half;
        out[i] = weights.iter().zip(&y[start..start + window]).map(|(w, v)| w * v).sum();
    }

    let ts: Vec<f64> = (0..window).map(|j| j as f64).collect();
    let design = polynomial_design(&ts, order);

    let head = solve_least_squares(&design, &DVector::from_column_slice(&y[..window]))?;
    for (i, slot) in out.iter_mut().enumerate().take(first) {
        *slot = eval_polynomial(&head, i as f64);
    }

    let tail_start = n - window;
    let tail = solve_least_squares(&design, &DVector::from_column_slice(&y[tail_start..]))?;
    for (i, slot) in out.iter_mut().enumerate().skip(last + 1) {
        *slot = eval_polynomial(&tail, (i - tail_start) as f64);
    }

    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_sum_to_one() {
        for window in [5, 6, 11, 50] {
            let w = savgol_weights(window, 2).unwrap();
            assert_eq!(w.len(), window);
            assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-9, "window {window}");
        }
    }

    #[test]
    fn quadratic_signal_is_preserved() {
        let y: Vec<f64> = (0..80).map(|i| {
            let t = i as f64;
            0.01 * t * t - t + 3.0
        }).collect();
        let s = savgol_smooth(&y, 50, 2).unwrap();
        for (a, b) in y.iter().zip(&s) {
            assert!((a - b).abs() < 1e-6, "{a} vs {b}");
        }
    }

    #[test]
    fn window_equal_to_length_uses_single_fit() {
        let y = vec![1.0, 3.0, 2.0, 5.0, 4.0];
        let s = savgol_smooth(&y, 5, 2).unwrap();
        assert_eq!(s.len(), 5);
        assert!(s.iter().all(|v| v.is_finite()));
    }
}
