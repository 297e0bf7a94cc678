//! Distance functions between spectra.
//!
//! Names follow the usual scientific-Python spellings so existing command
//! lines keep working (`pearsonr`, `euclidean`, `cityblock`, ...).

use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Pairwise distances between two equally long vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairwiseMetric {
    Euclidean,
    SqEuclidean,
    Cityblock,
    Cosine,
    Correlation,
    Chebyshev,
    BrayCurtis,
    Canberra,
    /// Euclidean distance over coordinates present in both vectors, scaled up
    /// by the fraction of missing ones.
    NanEuclidean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// `1 - r` with `r` the Pearson correlation coefficient.
    Pearson,
    Pairwise(PairwiseMetric),
}

impl FromStr for Metric {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use PairwiseMetric::*;
        let pairwise = match s.trim().to_ascii_lowercase().as_str() {
            "pearsonr" | "pearson" => return Ok(Metric::Pearson),
            "euclidean" | "l2" => Euclidean,
            "sqeuclidean" => SqEuclidean,
            "cityblock" | "manhattan" | "l1" => Cityblock,
            "cosine" => Cosine,
            "correlation" => Correlation,
            "chebyshev" => Chebyshev,
            "braycurtis" => BrayCurtis,
            "canberra" => Canberra,
            "nan_euclidean" => NanEuclidean,
            other => return Err(ConfigError::UnknownMetric(other.to_string())),
        };
        Ok(Metric::Pairwise(pairwise))
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Metric::Pearson => "pearsonr",
            Metric::Pairwise(p) => match p {
                PairwiseMetric::Euclidean => "euclidean",
                PairwiseMetric::SqEuclidean => "sqeuclidean",
                PairwiseMetric::Cityblock => "cityblock",
                PairwiseMetric::Cosine => "cosine",
                PairwiseMetric::Correlation => "correlation",
                PairwiseMetric::Chebyshev => "chebyshev",
                PairwiseMetric::BrayCurtis => "braycurtis",
                PairwiseMetric::Canberra => "canberra",
                PairwiseMetric::NanEuclidean => "nan_euclidean",
            },
        };
        f.write_str(name)
    }
}

impl Metric {
    pub fn distance(self, a: &[f64], b: &[f64]) -> f64 {
        match self {
            Metric::Pearson => 1.0 - pearson_r(a, b),
            Metric::Pairwise(p) => p.distance(a, b),
        }
    }
}

fn mean(v: &[f64]) -> f64 {
    v.iter().sum::<f64>() / v.len() as f64
}

/// Pearson correlation; `0` when either vector has no variance.
pub fn pearson_r(a: &[f64], b: &[f64]) -> f64 {
    let (ma, mb) = (mean(a), mean(b));
    let (mut sab, mut saa, mut sbb) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        let (dx, dy) = (x - ma, y - mb);
        sab += dx * dy;
        saa += dx * dx;
        sbb += dy * dy;
    }
    if saa == 0.0 || sbb == 0.0 {
        return 0.0;
    }
    (sab / (saa.sqrt() * sbb.sqrt())).clamp(-1.0, 1.0)
}

fn cosine_distance(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 1.0;
    }
    1.0 - (dot / (na * nb)).clamp(-1.0, 1.0)
}

impl PairwiseMetric {
    pub fn distance(self, a: &[f64], b: &[f64]) -> f64 {
        let pairs = a.iter().zip(b);
        match self {
            PairwiseMetric::Euclidean => pairs.map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt(),
            PairwiseMetric::SqEuclidean => pairs.map(|(x, y)| (x - y).powi(2)).sum(),
            PairwiseMetric::Cityblock => pairs.map(|(x, y)| (x - y).abs()).sum(),
            PairwiseMetric::Chebyshev => pairs.map(|(x, y)| (x - y).abs()).fold(0.0, f64::max),
            PairwiseMetric::Cosine => cosine_distance(a, b),
            PairwiseMetric::Correlation => 1.0 - pearson_r(a, b),
            PairwiseMetric::BrayCurtis => {
                let (num, den) = pairs.fold((0.0, 0.0), |(n, d), (x, y)| (n + (x - y).abs(), d + (x + y).abs()));
                if den == 0.0 { f64::NAN } else { num / den }
            }
            PairwiseMetric::Canberra => pairs
                .map(|(x, y)| {
                    let den = x.abs() + y.abs();
                    if den == 0.0 { 0.0 } else { (x - y).abs() / den }
                })
                .sum(),
            PairwiseMetric::NanEuclidean => {
                let present: Vec<f64> = pairs
                    .filter(|(x, y)| !x.is_nan() && !y.is_nan())
                    .map(|(x, y)| (x - y).powi(2))
                    .collect();
                if present.is_empty() {
                    return f64::NAN;
                }
                let weight = a.len() as f64 / present.len() as f64;
                (weight * present.iter().sum::<f64>()).sqrt()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aliases_and_rejects_unknown() {
        assert_eq!("pearsonr".parse::<Metric>(), Ok(Metric::Pearson));
        assert_eq!("L1".parse::<Metric>(), Ok(Metric::Pairwise(PairwiseMetric::Cityblock)));
        assert_eq!("manhattan".parse::<Metric>(), Ok(Metric::Pairwise(PairwiseMetric::Cityblock)));
        assert_eq!(
            "hamming".parse::<Metric>(),
            Err(ConfigError::UnknownMetric("hamming".to_string()))
        );
        assert_eq!(Metric::Pairwise(PairwiseMetric::NanEuclidean).to_string(), "nan_euclidean");
    }

    #[test]
    fn known_distances() {
        let a = [1.0, 0.0, 9.0];
        let b = [0.0, 0.0, 10.0];
        let d = |m: PairwiseMetric| m.distance(&a, &b);
        assert!((d(PairwiseMetric::Euclidean) - 2f64.sqrt()).abs() < 1e-12);
        assert_eq!(d(PairwiseMetric::SqEuclidean), 2.0);
        assert_eq!(d(PairwiseMetric::Cityblock), 2.0);
        assert_eq!(d(PairwiseMetric::Chebyshev), 1.0);
        assert!((d(PairwiseMetric::BrayCurtis) - 2.0 / 20.0).abs() < 1e-12);
        assert!((d(PairwiseMetric::Canberra) - (1.0 + 1.0 / 19.0)).abs() < 1e-12);
    }

    #[test]
    fn pearson_of_copy_is_zero() {
        let a = [3.0, 1.0, 4.0, 1.0, 5.0];
        assert!(Metric::Pearson.distance(&a, &a).abs() < 1e-12);
        let flat = [2.0; 5];
        assert_eq!(Metric::Pearson.distance(&a, &flat), 1.0);
    }

    #[test]
    fn nan_euclidean_scales_by_missing() {
        let a = [1.0, f64::NAN, 3.0, 0.0];
        let b = [1.0, 5.0, 1.0, 0.0];
        let d = PairwiseMetric::NanEuclidean.distance(&a, &b);
        assert!((d - (4.0_f64 * 4.0 / 3.0).sqrt()).abs() < 1e-12);
        assert!(PairwiseMetric::NanEuclidean.distance(&[f64::NAN], &[1.0]).is_nan());
    }
}
