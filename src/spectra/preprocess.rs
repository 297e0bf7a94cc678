//! Row-wise spectrum preprocessing ahead of template matching.
//!
//! Stages run in a fixed order: baseline (subtract the row minimum), smooth
//! (Savitzky–Golay), normalize (divide by the row maximum). Shapes are kept.

use nalgebra::DMatrix;

use crate::domain::PreprocessOptions;
use crate::error::ConfigError;
use crate::math::savgol_smooth;

/// Reject a smoothing window that cannot be applied to spectra of `len` samples.
pub fn validate_window(opts: &PreprocessOptions, len: usize) -> Result<(), ConfigError> {
    if !opts.smooth {
        return Ok(());
    }
    if opts.window <= opts.order {
        return Err(ConfigError::WindowTooShort {
            window: opts.window,
            order: opts.order,
        });
    }
    if opts.window > len {
        return Err(ConfigError::WindowTooLong {
            window: opts.window,
            len,
        });
    }
    Ok(())
}

pub fn baseline(row: &mut [f64]) {
    let min = row.iter().copied().fold(f64::INFINITY, f64::min);
    if min.is_finite() {
        row.iter_mut().for_each(|v| *v -= min);
    }
}

/// Divide by the row maximum; rows whose maximum is zero stay as they are.
pub fn normalize(row: &mut [f64]) {
    let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max.is_finite() && max != 0.0 {
        row.iter_mut().for_each(|v| *v /= max);
    }
}

/// Apply the enabled stages to every row of `spectra`.
pub fn preprocess(spectra: &DMatrix<f64>, opts: &PreprocessOptions) -> Result<DMatrix<f64>, ConfigError> {
    if !opts.any() {
        return Ok(spectra.clone());
    }
    validate_window(opts, spectra.ncols())?;

    let mut out = spectra.clone();
    for r in 0..out.nrows() {
        let mut row: Vec<f64> = out.row(r).iter().copied().collect();
        if opts.baseline {
            baseline(&mut row);
        }
        if opts.smooth {
            row = savgol_smooth(&row, opts.window, opts.order).ok_or(ConfigError::WindowTooShort {
                window: opts.window,
                order: opts.order,
            })?;
        }
        if opts.normalize {
            normalize(&mut row);
        }
        for (c, v) in row.into_iter().enumerate() {
            out[(r, c)] = v;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_then_normalize() {
        let m = DMatrix::from_row_slice(2, 3, &[2.0, 4.0, 6.0, 0.0, 0.0, 0.0]);
        let opts = PreprocessOptions::from_letters("bn").unwrap();
        let out = preprocess(&m, &opts).unwrap();
        assert_eq!(out.row(0).iter().copied().collect::<Vec<_>>(), vec![0.0, 0.5, 1.0]);
        assert_eq!(out.row(1).iter().copied().collect::<Vec<_>>(), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn normalize_is_idempotent() {
        let m = DMatrix::from_row_slice(1, 4, &[1.0, 3.0, 2.0, 8.0]);
        let opts = PreprocessOptions::from_tokens("norm");
        let once = preprocess(&m, &opts).unwrap();
        let twice = preprocess(&once, &opts).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn window_is_checked_against_length() {
        let m = DMatrix::from_element(1, 10, 1.0);
        let opts = PreprocessOptions::from_tokens("smooth");
        assert_eq!(
            preprocess(&m, &opts),
            Err(ConfigError::WindowTooLong { window: 50, len: 10 })
        );
        let short = opts.with_window(2);
        assert_eq!(
            preprocess(&m, &short),
            Err(ConfigError::WindowTooShort { window: 2, order: 2 })
        );
        let ok = opts.with_window(5);
        let out = preprocess(&m, &ok).unwrap();
        assert!(out.iter().all(|v| (v - 1.0).abs() < 1e-9));
    }

    #[test]
    fn disabled_options_return_input() {
        let m = DMatrix::from_row_slice(1, 2, &[5.0, -1.0]);
        assert_eq!(preprocess(&m, &PreprocessOptions::default()).unwrap(), m);
    }
}
