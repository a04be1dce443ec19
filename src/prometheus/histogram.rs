use parking_lot::Mutex;
use serde::Deserialize;
use slog::{debug, Logger};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use super::atomic_update::AtomicF64;
use super::buffer::Buffer;
use super::collector::Collector;
use super::desc::{Desc, Opts};
use super::error::{Error, Result};
use super::exemplar::{BucketRange, ExemplarSampler, ExemplarSamplerFactory};
use super::labels::{LabelSet, BUCKET_LABEL};
use super::metric_vec::{Accumulator, MetricVec};
use super::native_histogram::{
    pick_schema, validate_schema, NativeState, DEF_NATIVE_HISTOGRAM_ZERO_THRESHOLD,
    NATIVE_HISTOGRAM_SCHEMA_MINIMUM,
};
use super::promslog;
use super::snapshot::{cumulative_buckets, HistogramSnapshot, MetricSnapshot, MetricType};

// DEF_BUCKETS are the default Histogram buckets. The default buckets are
// tailored to broadly measure the response time (in seconds) of a network
// service. Most likely, however, you will be required to define buckets
// customized to your use case.
pub const DEF_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

pub const DEF_NATIVE_HISTOGRAM_INITIAL_SCHEMA: i32 = 5;
pub const DEF_NATIVE_HISTOGRAM_MAX_BUCKET_NUMBER: usize = 160;

// Linear scans beat a binary search below this many bounds.
const LINEAR_SEARCH_LIMIT: usize = 35;

/// `count` buckets, each `width` wide, the lowest one ending at `start`.
pub fn linear_buckets(start: f64, width: f64, count: usize) -> Result<Vec<f64>> {
    if count < 1 {
        return Err(Error::InvalidBucketLayout("linear_buckets needs a positive count"));
    }
    Ok((0..count).map(|i| start + width * i as f64).collect())
}

/// `count` buckets, the lowest ending at `start`, each `factor` times wider
/// than the previous one.
pub fn exponential_buckets(start: f64, factor: f64, count: usize) -> Result<Vec<f64>> {
    if count < 1 {
        return Err(Error::InvalidBucketLayout("exponential_buckets needs a positive count"));
    }
    if start <= 0.0 {
        return Err(Error::InvalidBucketLayout(
            "exponential_buckets needs a positive start value",
        ));
    }
    if factor <= 1.0 {
        return Err(Error::InvalidBucketLayout(
            "exponential_buckets needs a factor greater than 1",
        ));
    }
    let mut buckets = Vec::with_capacity(count);
    let mut current = start;
    for _ in 0..count {
        buckets.push(current);
        current *= factor;
    }
    Ok(buckets)
}

/// `count` exponential buckets spanning exactly `min_bucket..=max_bucket`.
pub fn exponential_buckets_range(min_bucket: f64, max_bucket: f64, count: usize) -> Result<Vec<f64>> {
    if count < 2 {
        return Err(Error::InvalidBucketLayout(
            "exponential_buckets_range needs a count of at least 2",
        ));
    }
    if min_bucket <= 0.0 {
        return Err(Error::InvalidBucketLayout(
            "exponential_buckets_range min needs to be greater than 0",
        ));
    }
    if max_bucket <= min_bucket {
        return Err(Error::InvalidBucketLayout(
            "exponential_buckets_range max needs to be greater than min",
        ));
    }

    let growth_factor = (max_bucket / min_bucket).powf(1.0 / (count - 1) as f64);
    Ok((0..count)
        .map(|i| min_bucket * growth_factor.powi(i as i32))
        .collect())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistogramOpts {
    #[serde(flatten)]
    pub common: Opts,

    // Buckets defines the classic buckets into which observations are
    // counted. Each element is the upper inclusive bound of a bucket. The
    // values are sorted and deduplicated, and a +Inf bucket is added
    // implicitly. None means DEF_BUCKETS. An empty vector means no classic
    // buckets at all unless classic_only is set, in which case only the
    // +Inf bucket remains.
    pub buckets: Option<Vec<f64>>,

    // At most one of these may be set. By default a histogram maintains both
    // classic and native buckets.
    pub classic_only: bool,
    pub native_only: bool,

    // The resolution native buckets start with. Bucket boundaries grow by a
    // factor of 2^(2^-schema) from one bucket to the next. Must be within
    // [-4, 8].
    pub native_histogram_initial_schema: i32,

    // If set, overrides native_histogram_initial_schema with the highest
    // resolution whose growth factor is still <= this value (e.g. 1.1 means
    // each bucket is at most 10% wider than the previous one).
    pub native_histogram_bucket_factor: Option<f64>,

    // All observations with an absolute value of less or equal the zero
    // threshold are accumulated into the "zero" bucket. The threshold starts
    // at the min value and may grow up to the max value to keep the number
    // of buckets within native_histogram_max_bucket_number.
    pub native_histogram_min_zero_threshold: f64,
    pub native_histogram_max_zero_threshold: f64,

    // Once the number of populated native buckets exceeds this limit the
    // zero bucket is widened and, if that is not enough, the resolution is
    // halved. Zero means unlimited.
    pub native_histogram_max_bucket_number: usize,

    // If non-zero, a histogram that has been scaled down (or exceeds its
    // bucket limit) is reset to its initial state once this much time has
    // passed since creation or the previous reset.
    pub native_histogram_reset_duration: Duration,
}

impl Default for HistogramOpts {
    fn default() -> Self {
        HistogramOpts {
            common: Opts::default(),
            buckets: None,
            classic_only: false,
            native_only: false,
            native_histogram_initial_schema: DEF_NATIVE_HISTOGRAM_INITIAL_SCHEMA,
            native_histogram_bucket_factor: None,
            native_histogram_min_zero_threshold: DEF_NATIVE_HISTOGRAM_ZERO_THRESHOLD,
            native_histogram_max_zero_threshold: DEF_NATIVE_HISTOGRAM_ZERO_THRESHOLD,
            native_histogram_max_bucket_number: DEF_NATIVE_HISTOGRAM_MAX_BUCKET_NUMBER,
            native_histogram_reset_duration: Duration::ZERO,
        }
    }
}

impl From<Opts> for HistogramOpts {
    fn from(common: Opts) -> Self {
        HistogramOpts {
            common,
            ..Default::default()
        }
    }
}

impl HistogramOpts {
    pub fn new(name: &str, help: &str) -> Self {
        Opts::new(name, help).into()
    }

    pub fn buckets(mut self, buckets: Vec<f64>) -> Self {
        self.buckets = Some(buckets);
        self
    }

    pub fn classic_only(mut self) -> Self {
        self.classic_only = true;
        self
    }

    pub fn native_only(mut self) -> Self {
        self.native_only = true;
        self
    }

    pub fn native_initial_schema(mut self, schema: i32) -> Self {
        self.native_histogram_initial_schema = schema;
        self
    }

    pub fn native_bucket_factor(mut self, factor: f64) -> Self {
        self.native_histogram_bucket_factor = Some(factor);
        self
    }

    pub fn native_min_zero_threshold(mut self, threshold: f64) -> Self {
        self.native_histogram_min_zero_threshold = threshold;
        self
    }

    pub fn native_max_zero_threshold(mut self, threshold: f64) -> Self {
        self.native_histogram_max_zero_threshold = threshold;
        self
    }

    pub fn native_max_bucket_number(mut self, max: usize) -> Self {
        self.native_histogram_max_bucket_number = max;
        self
    }

    pub fn native_reset_duration(mut self, duration: Duration) -> Self {
        self.native_histogram_reset_duration = duration;
        self
    }

    fn classic_upper_bounds(&self) -> Result<Vec<f64>> {
        if self.native_only {
            return Ok(Vec::new());
        }
        let mut bounds = match &self.buckets {
            None => DEF_BUCKETS.to_vec(),
            Some(b) if b.is_empty() && !self.classic_only => return Ok(Vec::new()),
            Some(b) => b.clone(),
        };
        if bounds.iter().any(|b| b.is_nan()) {
            return Err(Error::NanUpperBound);
        }
        bounds.sort_by(f64::total_cmp);
        bounds.dedup();
        if bounds.last() != Some(&f64::INFINITY) {
            bounds.push(f64::INFINITY);
        }
        Ok(bounds)
    }

    fn native_config(&self) -> Result<Option<NativeConfig>> {
        if self.classic_only {
            return Ok(None);
        }
        let initial_schema = match self.native_histogram_bucket_factor {
            Some(factor) => pick_schema(factor)?,
            None => validate_schema(self.native_histogram_initial_schema)?,
        };
        let min_zero_threshold = self.native_histogram_min_zero_threshold;
        if !(min_zero_threshold >= 0.0) {
            return Err(Error::InvalidZeroThreshold(min_zero_threshold));
        }
        let max_zero_threshold = self.native_histogram_max_zero_threshold;
        if !(max_zero_threshold >= min_zero_threshold) {
            return Err(Error::InvalidZeroThreshold(max_zero_threshold));
        }
        Ok(Some(NativeConfig {
            initial_schema,
            min_zero_threshold,
            max_zero_threshold,
            max_bucket_number: self.native_histogram_max_bucket_number,
            reset_duration: self.native_histogram_reset_duration,
        }))
    }

    fn validate(&self) -> Result<HistogramConfig> {
        if self.classic_only && self.native_only {
            return Err(Error::ConflictingHistogramKind);
        }
        Ok(HistogramConfig {
            upper_bounds: self.classic_upper_bounds()?,
            native: self.native_config()?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct NativeConfig {
    initial_schema: i32,
    min_zero_threshold: f64,
    max_zero_threshold: f64,
    max_bucket_number: usize,
    reset_duration: Duration,
}

#[derive(Debug)]
struct HistogramConfig {
    // Sorted, ends with +Inf. Empty if there are no classic buckets.
    upper_bounds: Vec<f64>,
    native: Option<NativeConfig>,
}

struct Created {
    timestamp: SystemTime,
    at: Instant,
}

impl Created {
    fn now() -> Self {
        Created {
            timestamp: SystemTime::now(),
            at: Instant::now(),
        }
    }
}

/// One histogram series: classic buckets, native buckets, or both.
///
/// Observations go through the quiescence buffer, so a snapshot always
/// reflects an exact prefix of the observations and `count` equals the sum
/// of the bucket counts.
pub struct Histogram {
    buffer: Buffer,
    config: Arc<HistogramConfig>,

    // Non-cumulative: each observation increments exactly one bucket.
    classic: Vec<AtomicU64>,
    native: Option<NativeState>,
    sum: AtomicF64,

    // Incremented last by every applied observation. The buffer compares it
    // against its own progress to know that no direct write is in flight.
    count: AtomicU64,

    created: Mutex<Created>,
    exemplars: Option<Box<dyn ExemplarSampler>>,
    logger: Logger,
}

impl Histogram {
    /// Creates a standalone histogram, not attached to any family.
    pub fn new(opts: &HistogramOpts) -> Result<Self> {
        Ok(Histogram::with_config(
            Arc::new(opts.validate()?),
            None,
            promslog::discard(),
        ))
    }

    fn with_config(
        config: Arc<HistogramConfig>,
        exemplars: Option<Box<dyn ExemplarSampler>>,
        logger: Logger,
    ) -> Self {
        let native = config
            .native
            .map(|n| NativeState::new(n.initial_schema, n.min_zero_threshold));
        Histogram {
            buffer: Buffer::new(),
            classic: config.upper_bounds.iter().map(|_| AtomicU64::new(0)).collect(),
            native,
            config,
            sum: AtomicF64::default(),
            count: AtomicU64::new(0),
            created: Mutex::new(Created::now()),
            exemplars,
            logger,
        }
    }

    /// Records `value`. NaN is silently dropped.
    pub fn observe(&self, value: f64) {
        self.observe_inner(value, None);
    }

    /// Records `value` and offers it to the exemplar sampler together with
    /// `labels`.
    pub fn observe_with_exemplar(&self, value: f64, labels: &LabelSet) {
        self.observe_inner(value, Some(labels));
    }

    fn observe_inner(&self, value: f64, labels: Option<&LabelSet>) {
        if value.is_nan() {
            return;
        }
        if !self.buffer.append(value) {
            self.do_observe(value, false);
        }
        if let Some(sampler) = &self.exemplars {
            let bucket = self.find_bucket(value).map(|i| self.bucket_range(i));
            sampler.observe(value, bucket, labels);
        }
    }

    // Index into the classic buckets, or None if there are none.
    fn find_bucket(&self, v: f64) -> Option<usize> {
        let bounds = &self.config.upper_bounds;
        if bounds.is_empty() {
            return None;
        }
        if bounds.len() < LINEAR_SEARCH_LIMIT {
            return bounds.iter().position(|&bound| v <= bound);
        }
        Some(bounds.partition_point(|&bound| bound < v))
    }

    fn bucket_range(&self, i: usize) -> BucketRange {
        let bounds = &self.config.upper_bounds;
        BucketRange {
            lower: if i == 0 { f64::NEG_INFINITY } else { bounds[i - 1] },
            upper: bounds[i],
        }
    }

    // from_buffer is set for replayed observations, which must not trigger
    // another rescale while the buffer is still held.
    fn do_observe(&self, value: f64, from_buffer: bool) {
        if let Some(i) = self.find_bucket(value) {
            self.classic[i].fetch_add(1, Ordering::Relaxed);
        }
        let bucket_created = self.native.as_ref().map_or(false, |n| n.observe(value));
        self.sum.add(value);
        self.count.fetch_add(1, Ordering::Release);
        if !from_buffer {
            self.maybe_reset_or_scale_down(value, bucket_created);
        }
    }

    fn is_caught_up(&self, expected: u64) -> bool {
        self.count.load(Ordering::Acquire) == expected
    }

    fn reset_due(&self, native: &NativeConfig) -> bool {
        !native.reset_duration.is_zero() && self.created.lock().at.elapsed() >= native.reset_duration
    }

    fn over_budget(&self, state: &NativeState, native: &NativeConfig) -> bool {
        native.max_bucket_number != 0 && state.bucket_number() > native.max_bucket_number
    }

    // A scaled-down histogram is reset on the first observation after the
    // reset duration, whether or not that observation created a bucket.
    // Otherwise only a new bucket can push the histogram over its budget.
    fn maybe_reset_or_scale_down(&self, value: f64, bucket_created: bool) {
        let (state, native) = match (&self.native, &self.config.native) {
            (Some(state), Some(native)) => (state, native),
            _ => return,
        };

        let was_reset = if state.schema() < native.initial_schema && self.reset_due(native) {
            self.buffer.run_atomic(
                |expected| self.is_caught_up(expected),
                || {
                    // Another thread may have reset it in the meantime.
                    if state.schema() < native.initial_schema && self.reset_due(native) {
                        self.reset(native);
                        return true;
                    }
                    false
                },
                |v| self.do_observe(v, true),
            )
        } else if bucket_created {
            self.maybe_scale_down(state, native)
        } else {
            false
        };

        if was_reset && !self.buffer.append(value) {
            // The reset discarded the triggering observation too.
            self.do_observe(value, true);
        }
    }

    // Returns true if the histogram was reset instead of scaled down.
    fn maybe_scale_down(&self, state: &NativeState, native: &NativeConfig) -> bool {
        if state.schema() <= NATIVE_HISTOGRAM_SCHEMA_MINIMUM || !self.over_budget(state, native) {
            return false;
        }
        self.buffer.run_atomic(
            |expected| self.is_caught_up(expected),
            || {
                // Another thread may have rescaled in the meantime.
                if state.schema() <= NATIVE_HISTOGRAM_SCHEMA_MINIMUM
                    || !self.over_budget(state, native)
                {
                    return false;
                }
                if self.reset_due(native) {
                    self.reset(native);
                    return true;
                }
                if let Some(threshold) = state.widen_zero_bucket(native.max_zero_threshold) {
                    debug!(self.logger, "widened native zero bucket"; "zero_threshold" => threshold);
                    return false;
                }
                if let Some(schema) = state.double_bucket_width() {
                    debug!(self.logger, "halved native histogram resolution"; "schema" => schema);
                    if schema == NATIVE_HISTOGRAM_SCHEMA_MINIMUM && self.over_budget(state, native) {
                        debug!(self.logger, "native bucket limit exceeded at minimum resolution";
                            "buckets" => state.bucket_number());
                    }
                }
                false
            },
            |v| self.do_observe(v, true),
        )
    }

    // Only called from inside run_atomic.
    fn reset(&self, native: &NativeConfig) {
        for bucket in &self.classic {
            bucket.store(0, Ordering::Relaxed);
        }
        if let Some(state) = &self.native {
            state.reset(native.initial_schema, native.min_zero_threshold);
        }
        self.sum.store(0.0, Ordering::Relaxed);
        self.count.store(0, Ordering::Release);
        *self.created.lock() = Created::now();
        if let Some(sampler) = &self.exemplars {
            sampler.reset();
        }
        self.buffer.reset();
        debug!(self.logger, "reset native histogram");
    }

    pub fn collect(&self) -> HistogramSnapshot {
        let exemplars = self
            .exemplars
            .as_ref()
            .map(|s| s.collect())
            .unwrap_or_default();
        self.buffer.run_atomic(
            |expected| self.is_caught_up(expected),
            || HistogramSnapshot {
                count: self.count.load(Ordering::Acquire),
                sum: self.sum.load(Ordering::Relaxed),
                classic: cumulative_buckets(
                    &self.config.upper_bounds,
                    self.classic.iter().map(|c| c.load(Ordering::Relaxed)),
                ),
                native: self.native.as_ref().map(NativeState::snapshot),
                exemplars,
                created: self.created.lock().timestamp,
            },
            |v| self.do_observe(v, true),
        )
    }
}

impl Accumulator for Histogram {
    type Snapshot = HistogramSnapshot;

    fn collect(&self) -> HistogramSnapshot {
        Histogram::collect(self)
    }
}

/// A histogram family partitioned by label values.
pub struct HistogramVec {
    inner: MetricVec<Histogram>,
}

impl HistogramVec {
    pub fn new(opts: HistogramOpts, label_names: &[&str]) -> Result<Self> {
        HistogramVec::build(opts, label_names, None)
    }

    /// Every series gets its own sampler from `factory`.
    pub fn with_exemplar_sampler(
        opts: HistogramOpts,
        label_names: &[&str],
        factory: ExemplarSamplerFactory,
    ) -> Result<Self> {
        HistogramVec::build(opts, label_names, Some(factory))
    }

    fn build(
        opts: HistogramOpts,
        label_names: &[&str],
        factory: Option<ExemplarSamplerFactory>,
    ) -> Result<Self> {
        let desc = Desc::new(&opts.common, label_names, &[BUCKET_LABEL], "histogram")?;
        let config = Arc::new(opts.validate()?);
        let inner = MetricVec::new(desc, move |logger| {
            Histogram::with_config(
                Arc::clone(&config),
                factory.as_ref().map(|f| f()),
                logger.clone(),
            )
        });
        Ok(HistogramVec { inner })
    }

    pub fn with_logger(self, logger: Logger) -> Self {
        HistogramVec {
            inner: self.inner.with_logger(logger),
        }
    }

    pub fn get_metric_with_label_values(&self, vals: &[&str]) -> Result<Arc<Histogram>> {
        self.inner.get_metric_with_label_values(vals)
    }

    pub fn with_label_values(&self, vals: &[&str]) -> Arc<Histogram> {
        self.inner.with_label_values(vals)
    }

    pub fn remove_label_values(&self, vals: &[&str]) -> bool {
        self.inner.remove_label_values(vals)
    }

    pub fn reset(&self) {
        self.inner.reset()
    }
}

impl Collector for HistogramVec {
    fn desc(&self) -> &Desc {
        self.inner.desc()
    }

    fn collect(&self) -> MetricSnapshot {
        self.inner.metric_snapshot(MetricType::Histogram)
    }
}
