//! Damped least squares (Levenberg–Marquardt) used by the in-process engine.
//!
//! The caller supplies a residual function `r(p)` (already divided by sigma);
//! we minimize `Σ r_i(p)^2` with a forward-difference Jacobian.

use nalgebra::{DMatrix, DVector};

#[derive(Debug, Clone, Copy)]
pub struct LmSettings {
    /// Cap on residual evaluations (Jacobian columns included).
    pub max_evaluations: usize,
    /// Stop when an accepted step improves WSSR by less than this fraction.
    pub tolerance: f64,
}

impl Default for LmSettings {
    fn default() -> Self {
        Self {
            max_evaluations: 1000,
            tolerance: 1e-10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LmOutcome {
    pub params: Vec<f64>,
    pub wssr: f64,
    pub initial_wssr: f64,
    pub evaluations: usize,
}

pub fn wssr(residuals: &[f64]) -> f64 {
    residuals.iter().map(|r| r * r).sum()
}

/// Forward-difference Jacobian of `f` at `p` (rows = residuals).
pub fn jacobian<F>(f: &F, p: &[f64], r0: &[f64]) -> DMatrix<f64>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    let m = r0.len();
    let n = p.len();
    let mut jac = DMatrix::zeros(m, n);
    let mut work = p.to_vec();
    for j in 0..n {
        let h = f64::EPSILON.sqrt() * p[j].abs().max(1.0);
        work[j] = p[j] + h;
        let r1 = f(&work);
        work[j] = p[j];
        for i in 0..m {
            jac[(i, j)] = (r1[i] - r0[i]) / h;
        }
    }
    jac
}

/// Minimize `Σ f(p)_i^2` starting at `initial`.
pub fn levenberg_marquardt<F>(f: F, initial: &[f64], settings: &LmSettings) -> LmOutcome
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    let n = initial.len();
    let mut p = initial.to_vec();
    let mut r = f(&p);
    let mut current = wssr(&r);
    let initial_wssr = current;
    let mut evaluations = 1usize;
    let mut lambda = 1e-3;

    while evaluations + n < settings.max_evaluations && current.is_finite() {
        let jac = jacobian(&f, &p, &r);
        evaluations += n;

        let jt = jac.transpose();
        let a = &jt * &jac;
        let g = &jt * DVector::from_column_slice(&r);

        let mut accepted = false;
        while evaluations < settings.max_evaluations && lambda < 1e12 {
            let mut damped = a.clone();
            for k in 0..n {
                let d = a[(k, k)];
                damped[(k, k)] += lambda * if d > 0.0 { d } else { 1.0 };
            }
            let Some(chol) = damped.cholesky() else {
                lambda *= 10.0;
                continue;
            };
            let step = chol.solve(&(-&g));
            let trial: Vec<f64> = p.iter().zip(step.iter()).map(|(a, b)| a + b).collect();
            let r_trial = f(&trial);
            evaluations += 1;
            let trial_wssr = wssr(&r_trial);

            if trial_wssr.is_finite() && trial_wssr < current {
                let improvement = (current - trial_wssr) / current.max(f64::MIN_POSITIVE);
                p = trial;
                r = r_trial;
                current = trial_wssr;
                lambda = (lambda / 10.0).max(1e-12);
                accepted = improvement > settings.tolerance;
                break;
            }
            lambda *= 10.0;
        }

        if !accepted {
            break;
        }
    }

    LmOutcome {
        params: p,
        wssr: current,
        initial_wssr,
        evaluations,
    }
}

/// Standard errors from `(JᵀJ)⁻¹ · WSSR / dof`.
///
/// `None` marks parameters whose variance could not be computed.
pub fn parameter_errors(jac: &DMatrix<f64>, wssr: f64) -> Vec<Option<f64>> {
    let (m, n) = jac.shape();
    let dof = if m > n { (m - n) as f64 } else { 1.0 };
    let a = jac.transpose() * jac;
    let Some(inv) = a.try_inverse() else {
        return vec![None; n];
    };
    (0..n)
        .map(|k| {
            let var = inv[(k, k)] * wssr / dof;
            if var.is_finite() && var >= 0.0 { Some(var.sqrt()) } else { None }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_exponential_decay() {
        let xs: Vec<f64> = (0..20).map(|i| i as f64 * 0.25).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 3.0 * (-0.7 * x).exp()).collect();
        let f = |p: &[f64]| -> Vec<f64> {
            xs.iter().zip(&ys).map(|(x, y)| y - p[0] * (-p[1] * x).exp()).collect()
        };
        let out = levenberg_marquardt(f, &[1.0, 0.1], &LmSettings::default());
        assert!((out.params[0] - 3.0).abs() < 1e-5, "{:?}", out.params);
        assert!((out.params[1] - 0.7).abs() < 1e-5, "{:?}", out.params);
        assert!(out.wssr < out.initial_wssr);
    }

    #[test]
    fn singular_jacobian_has_unknown_errors() {
        let jac = DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
        assert_eq!(parameter_errors(&jac, 1.0), vec![None, None]);

        let jac = DMatrix::from_row_slice(3, 1, &[1.0, 1.0, 1.0]);
        let errs = parameter_errors(&jac, 2.0);
        assert!((errs[0].unwrap() - (1.0f64 / 3.0).sqrt()).abs() < 1e-12);
    }
}
