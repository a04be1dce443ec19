//! Concurrency core of a metrics client: accumulators that many threads
//! write while a collector takes consistent snapshots.

pub mod atomic_update;
pub mod buffer;
pub mod collector;
pub mod counter;
pub mod desc;
pub mod error;
pub mod exemplar;
pub mod fnv;
pub mod gauge;
pub mod histogram;
pub mod labels;
pub mod metric_vec;
pub mod native_histogram;
pub mod promslog;
pub mod snapshot;
pub mod summary;

pub use self::collector::{collect_all, Collector};
pub use self::counter::{Counter, CounterVec};
pub use self::desc::{Desc, Opts};
pub use self::error::{Error, Result};
pub use self::exemplar::{BucketRange, Exemplar, ExemplarSampler, ExemplarSamplerFactory};
pub use self::gauge::{Gauge, GaugeVec};
pub use self::histogram::{
    exponential_buckets, exponential_buckets_range, linear_buckets, Histogram, HistogramOpts,
    HistogramVec, DEF_BUCKETS,
};
pub use self::labels::LabelSet;
pub use self::metric_vec::{Accumulator, MetricVec};
pub use self::snapshot::{
    ClassicBucket, CounterSnapshot, DataPoint, GaugeSnapshot, HistogramKind, HistogramSnapshot,
    MetricSnapshot, MetricType, NativeBuckets, QuantileValue, Snapshot, SummarySnapshot,
};
pub use self::summary::{
    Quantile, QuantileEstimator, QuantileEstimatorFactory, Summary, SummaryOpts, SummaryVec,
};
