use std::sync::Arc;
use std::time::SystemTime;

use super::labels::LabelSet;

#[derive(Debug, Clone, PartialEq)]
pub struct Exemplar {
    pub value: f64,
    pub labels: LabelSet,
    pub timestamp: Option<SystemTime>,
}

/// The classic bucket an observation fell into: `(lower, upper]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketRange {
    pub lower: f64,
    pub upper: f64,
}

/// Hook for an external exemplar sampling strategy.
///
/// `observe` runs synchronously on every observation, outside the buffer
/// protocol. Accumulators never inspect exemplars; they only include
/// whatever `collect` returns in the next snapshot.
pub trait ExemplarSampler: Send + Sync {
    fn observe(&self, value: f64, bucket: Option<BucketRange>, labels: Option<&LabelSet>);

    fn collect(&self) -> Vec<Exemplar>;

    /// Called when a histogram resets its state.
    fn reset(&self) {}
}

/// Creates one sampler per series.
pub type ExemplarSamplerFactory = Arc<dyn Fn() -> Box<dyn ExemplarSampler> + Send + Sync>;

pub(crate) fn newest(exemplars: Vec<Exemplar>) -> Option<Exemplar> {
    exemplars.into_iter().reduce(|a, b| if b.timestamp > a.timestamp { b } else { a })
}

pub(crate) fn oldest(exemplars: Vec<Exemplar>) -> Option<Exemplar> {
    exemplars.into_iter().reduce(|a, b| if b.timestamp < a.timestamp { b } else { a })
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(value: f64, secs: u64) -> Exemplar {
        Exemplar {
            value,
            labels: LabelSet::empty(),
            timestamp: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(secs)),
        }
    }

    #[test]
    fn test_newest_and_oldest() {
        let all = vec![at(1.0, 10), at(2.0, 30), at(3.0, 20)];
        assert_eq!(newest(all.clone()).map(|e| e.value), Some(2.0));
        assert_eq!(oldest(all).map(|e| e.value), Some(1.0));
        assert_eq!(newest(Vec::new()), None);
    }
}
