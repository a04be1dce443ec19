//! Immutable point-in-time copies of accumulator state.
//!
//! Snapshots own all their data and never refer back to the accumulator
//! they were taken from.

use std::time::SystemTime;

use super::exemplar::Exemplar;
use super::labels::LabelSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
    Summary,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CounterSnapshot {
    pub value: f64,
    pub exemplar: Option<Exemplar>,
    pub created: SystemTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GaugeSnapshot {
    pub value: f64,
    pub exemplar: Option<Exemplar>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassicBucket {
    pub upper_bound: f64,
    // Observations <= upper_bound, i.e. including all lower buckets.
    pub cumulative_count: u64,
}

/// Folds per-bucket counts into the cumulative form used for exposition.
pub(crate) fn cumulative_buckets(
    upper_bounds: &[f64],
    counts: impl IntoIterator<Item = u64>,
) -> Vec<ClassicBucket> {
    let mut cumulative_count = 0;
    upper_bounds
        .iter()
        .zip(counts)
        .map(|(&upper_bound, count)| {
            cumulative_count += count;
            ClassicBucket {
                upper_bound,
                cumulative_count,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeBuckets {
    pub schema: i32,
    pub zero_threshold: f64,
    pub zero_count: u64,
    // (bucket index, count), sorted by index.
    pub positive: Vec<(i32, u64)>,
    pub negative: Vec<(i32, u64)>,
}

impl NativeBuckets {
    /// Zero bucket plus every positive and negative bucket.
    pub fn total_count(&self) -> u64 {
        self.zero_count
            + self.positive.iter().map(|&(_, c)| c).sum::<u64>()
            + self.negative.iter().map(|&(_, c)| c).sum::<u64>()
    }

    pub fn bucket_number(&self) -> usize {
        self.positive.len() + self.negative.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistogramKind {
    Classic,
    Native,
    Hybrid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: f64,
    // Empty for native-only histograms. Otherwise the last bucket is +Inf.
    pub classic: Vec<ClassicBucket>,
    pub native: Option<NativeBuckets>,
    pub exemplars: Vec<Exemplar>,
    pub created: SystemTime,
}

impl HistogramSnapshot {
    pub fn kind(&self) -> HistogramKind {
        match (self.classic.is_empty(), self.native.is_some()) {
            (false, false) => HistogramKind::Classic,
            (true, _) => HistogramKind::Native,
            (false, true) => HistogramKind::Hybrid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantileValue {
    pub quantile: f64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummarySnapshot {
    pub count: u64,
    pub sum: f64,
    pub quantiles: Vec<QuantileValue>,
    pub created: SystemTime,
}

/// Kind-tagged snapshot of a single series.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    Counter(CounterSnapshot),
    Gauge(GaugeSnapshot),
    Histogram(HistogramSnapshot),
    Summary(SummarySnapshot),
}

impl Snapshot {
    pub fn metric_type(&self) -> MetricType {
        match self {
            Snapshot::Counter(_) => MetricType::Counter,
            Snapshot::Gauge(_) => MetricType::Gauge,
            Snapshot::Histogram(_) => MetricType::Histogram,
            Snapshot::Summary(_) => MetricType::Summary,
        }
    }

    pub fn created(&self) -> Option<SystemTime> {
        match self {
            Snapshot::Counter(c) => Some(c.created),
            Snapshot::Gauge(_) => None,
            Snapshot::Histogram(h) => Some(h.created),
            Snapshot::Summary(s) => Some(s.created),
        }
    }
}

impl From<CounterSnapshot> for Snapshot {
    fn from(s: CounterSnapshot) -> Self {
        Snapshot::Counter(s)
    }
}

impl From<GaugeSnapshot> for Snapshot {
    fn from(s: GaugeSnapshot) -> Self {
        Snapshot::Gauge(s)
    }
}

impl From<HistogramSnapshot> for Snapshot {
    fn from(s: HistogramSnapshot) -> Self {
        Snapshot::Histogram(s)
    }
}

impl From<SummarySnapshot> for Snapshot {
    fn from(s: SummarySnapshot) -> Self {
        Snapshot::Summary(s)
    }
}

/// One series: its full label set and the snapshot taken for it.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint<S> {
    pub labels: LabelSet,
    pub snapshot: S,
}

/// Everything the exposition layer needs for one metric family.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSnapshot {
    pub name: String,
    pub help: String,
    pub metric_type: MetricType,
    pub data_points: Vec<DataPoint<Snapshot>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cumulative_buckets() {
        let buckets = cumulative_buckets(&[5.0, 10.0, f64::INFINITY], vec![1, 1, 1]);
        let counts: Vec<_> = buckets.iter().map(|b| b.cumulative_count).collect();
        assert_eq!(counts, vec![1, 2, 3]);
        assert_eq!(buckets[2].upper_bound, f64::INFINITY);
    }

    #[test]
    fn test_native_totals() {
        let native = NativeBuckets {
            schema: 0,
            zero_threshold: 0.0,
            zero_count: 2,
            positive: vec![(0, 3), (4, 1)],
            negative: vec![(1, 5)],
        };
        assert_eq!(native.total_count(), 11);
        assert_eq!(native.bucket_number(), 3);
    }

    #[test]
    fn test_histogram_kind() {
        let mut h = HistogramSnapshot {
            count: 0,
            sum: 0.0,
            classic: cumulative_buckets(&[f64::INFINITY], vec![0]),
            native: None,
            exemplars: Vec::new(),
            created: SystemTime::now(),
        };
        assert_eq!(h.kind(), HistogramKind::Classic);
        h.native = Some(NativeBuckets {
            schema: 3,
            zero_threshold: 0.0,
            zero_count: 0,
            positive: Vec::new(),
            negative: Vec::new(),
        });
        assert_eq!(h.kind(), HistogramKind::Hybrid);
        h.classic.clear();
        assert_eq!(h.kind(), HistogramKind::Native);
        assert_eq!(Snapshot::from(h).metric_type(), MetricType::Histogram);
    }
}
