//! Spectrum comparison: preprocessing, distance metrics and template matching.

pub mod matcher;
pub mod metric;
pub mod preprocess;

pub use matcher::{MatchResult, match_templates};
pub use metric::{Metric, PairwiseMetric};
pub use preprocess::preprocess;
