//! Error types shared by all accumulators and metric families.

use thiserror::Error;

/// Errors reported synchronously to the caller that introduced them.
///
/// None of these leave an accumulator in a partially updated state: the
/// offending call is rejected before it touches any counter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("negative increment {0} is illegal for counter metrics")]
    NegativeIncrement(f64),

    #[error("NaN increment is illegal for counter metrics")]
    NanIncrement,

    #[error("cannot use NaN as upper bound for a histogram")]
    NanUpperBound,

    #[error("unsupported native histogram schema {0}: expecting -4 <= schema <= 8")]
    InvalidSchema(i32),

    #[error("native histogram bucket factor must be greater than 1, got {0}")]
    InvalidBucketFactor(f64),

    #[error("illegal native zero threshold {0}: must be >= 0")]
    InvalidZeroThreshold(f64),

    #[error("a histogram cannot be both classic-only and native-only")]
    ConflictingHistogramKind,

    #[error("invalid bucket layout: {0}")]
    InvalidBucketLayout(&'static str),

    #[error("quantile {0} invalid: expected number between 0.0 and 1.0")]
    InvalidQuantile(f64),

    #[error("quantile error {0} invalid: expected number between 0.0 and 1.0")]
    InvalidQuantileError(f64),

    #[error("summary has quantiles configured but no quantile estimator")]
    MissingQuantileEstimator,

    #[error("expected {expected} label values, but got {got}")]
    InconsistentCardinality { expected: usize, got: usize },

    #[error("{0:?} is not a valid metric name")]
    InvalidMetricName(String),

    #[error("{0:?} is not a valid label name")]
    InvalidLabelName(String),

    #[error("duplicate label name {0:?}")]
    DuplicateLabelName(String),

    #[error("{label:?} is not allowed as label name in {kind} metrics")]
    ReservedLabelName { label: String, kind: &'static str },

    #[error("unrecognized log level {0:?}")]
    InvalidLogLevel(String),

    #[error("unrecognized log format {0:?}")]
    InvalidLogFormat(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            Error::NegativeIncrement(-1.0).to_string(),
            "negative increment -1 is illegal for counter metrics"
        );
        assert_eq!(
            Error::InconsistentCardinality { expected: 2, got: 1 }.to_string(),
            "expected 2 label values, but got 1"
        );
        assert_eq!(
            Error::ReservedLabelName { label: "le".into(), kind: "histogram" }.to_string(),
            "\"le\" is not allowed as label name in histogram metrics"
        );
    }
}
