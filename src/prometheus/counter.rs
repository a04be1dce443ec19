use slog::Logger;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use super::atomic_update::AtomicF64;
use super::collector::Collector;
use super::desc::{Desc, Opts};
use super::error::{Error, Result};
use super::exemplar::{newest, ExemplarSampler, ExemplarSamplerFactory};
use super::labels::LabelSet;
use super::metric_vec::{Accumulator, MetricVec};
use super::snapshot::{CounterSnapshot, MetricSnapshot, MetricType};

const TOTAL_SUFFIX: &str = "_total";

// 2^53: every integer below it converts to f64 and back exactly.
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

/// A monotonically increasing sum.
///
/// Integral increments below 2^53 go to an integer cell; fractional and
/// larger ones, or any that would overflow the integer cell, go to a float
/// cell. The reported value is the sum of
/// both. A counter needs no quiescence buffer: each cell is updated by a
/// single atomic operation.
pub struct Counter {
    val_int: AtomicU64,
    val_float: AtomicF64,
    created: SystemTime,
    exemplars: Option<Box<dyn ExemplarSampler>>,
}

impl Default for Counter {
    fn default() -> Self {
        Counter::new()
    }
}

impl Counter {
    pub fn new() -> Self {
        Counter::with_exemplar_sampler(None)
    }

    fn with_exemplar_sampler(exemplars: Option<Box<dyn ExemplarSampler>>) -> Self {
        Counter {
            val_int: AtomicU64::new(0),
            val_float: AtomicF64::default(),
            created: SystemTime::now(),
            exemplars,
        }
    }

    pub fn inc(&self) {
        if !self.add_int(1) {
            self.val_float.add(1.0);
        }
        self.sample(1.0, None);
    }

    /// Adds `v`. Negative and NaN amounts are rejected and leave the counter
    /// as it was.
    pub fn inc_by(&self, v: f64) -> Result<()> {
        self.add(v)?;
        self.sample(v, None);
        Ok(())
    }

    pub fn inc_with_exemplar(&self, v: f64, labels: &LabelSet) -> Result<()> {
        self.add(v)?;
        self.sample(v, Some(labels));
        Ok(())
    }

    fn add(&self, v: f64) -> Result<()> {
        if v.is_nan() {
            return Err(Error::NanIncrement);
        }
        if v < 0.0 {
            return Err(Error::NegativeIncrement(v));
        }
        let ival = v as u64;
        if v >= MAX_EXACT_INT || ival as f64 != v || !self.add_int(ival) {
            self.val_float.add(v);
        }
        Ok(())
    }

    // Fails instead of wrapping when the integer cell would overflow.
    fn add_int(&self, n: u64) -> bool {
        self.val_int
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| cur.checked_add(n))
            .is_ok()
    }

    fn sample(&self, v: f64, labels: Option<&LabelSet>) {
        if let Some(sampler) = &self.exemplars {
            sampler.observe(v, None, labels);
        }
    }

    pub fn get(&self) -> f64 {
        let fval = self.val_float.load(Ordering::Relaxed);
        let ival = self.val_int.load(Ordering::Relaxed);
        fval + ival as f64
    }

    pub fn collect(&self) -> CounterSnapshot {
        // The exemplar is read first so it can never be newer than the value.
        let exemplar = self.exemplars.as_ref().and_then(|s| newest(s.collect()));
        CounterSnapshot {
            value: self.get(),
            exemplar,
            created: self.created,
        }
    }
}

impl Accumulator for Counter {
    type Snapshot = CounterSnapshot;

    fn collect(&self) -> CounterSnapshot {
        Counter::collect(self)
    }
}

/// A counter family partitioned by label values. A trailing `_total` is
/// stripped from the name.
pub struct CounterVec {
    inner: MetricVec<Counter>,
}

impl CounterVec {
    pub fn new(opts: Opts, label_names: &[&str]) -> Result<Self> {
        CounterVec::build(opts, label_names, None)
    }

    pub fn with_exemplar_sampler(
        opts: Opts,
        label_names: &[&str],
        factory: ExemplarSamplerFactory,
    ) -> Result<Self> {
        CounterVec::build(opts, label_names, Some(factory))
    }

    fn build(
        mut opts: Opts,
        label_names: &[&str],
        factory: Option<ExemplarSamplerFactory>,
    ) -> Result<Self> {
        if let Some(name) = opts.name.strip_suffix(TOTAL_SUFFIX) {
            opts.name = name.to_string();
        }
        let desc = Desc::new(&opts, label_names, &[], "counter")?;
        let inner = MetricVec::new(desc, move |_| {
            Counter::with_exemplar_sampler(factory.as_ref().map(|f| f()))
        });
        Ok(CounterVec { inner })
    }

    pub fn with_logger(self, logger: Logger) -> Self {
        CounterVec {
            inner: self.inner.with_logger(logger),
        }
    }

    pub fn get_metric_with_label_values(&self, vals: &[&str]) -> Result<Arc<Counter>> {
        self.inner.get_metric_with_label_values(vals)
    }

    pub fn with_label_values(&self, vals: &[&str]) -> Arc<Counter> {
        self.inner.with_label_values(vals)
    }

    pub fn remove_label_values(&self, vals: &[&str]) -> bool {
        self.inner.remove_label_values(vals)
    }

    pub fn reset(&self) {
        self.inner.reset()
    }
}

impl Collector for CounterVec {
    fn desc(&self) -> &Desc {
        self.inner.desc()
    }

    fn collect(&self) -> MetricSnapshot {
        self.inner.metric_snapshot(MetricType::Counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prometheus::exemplar::testing::recording_factory;
    use crate::prometheus::snapshot::Snapshot;
    use std::thread;

    #[test]
    fn test_counter_add() {
        let counter = Counter::new();
        counter.inc();
        assert_eq!(counter.get(), 1.0);
        counter.inc_by(42.0).unwrap();
        assert_eq!(counter.get(), 43.0);
        counter.inc_by(0.5).unwrap();
        assert_eq!(counter.get(), 43.5);

        assert_eq!(counter.inc_by(-1.0), Err(Error::NegativeIncrement(-1.0)));
        assert_eq!(counter.get(), 43.5);
    }

    #[test]
    fn test_counter_never_wraps() {
        let counter = Counter::new();
        counter.inc();
        counter.inc_by(18_446_744_073_709_551_616.0).unwrap();
        assert_eq!(counter.get(), 18_446_744_073_709_551_616.0 + 1.0);

        let counter = Counter::new();
        counter.inc_by(1e19).unwrap();
        counter.inc_by(1e19).unwrap();
        assert_eq!(counter.get(), 2e19);

        let counter = Counter::new();
        counter.val_int.store(u64::MAX - 1, Ordering::Relaxed);
        let before = counter.get();
        counter.inc_by(5.0).unwrap();
        counter.inc();
        counter.inc();
        assert!(counter.get() >= before);
        assert_eq!(counter.val_float.load(Ordering::Relaxed), 6.0);
        assert_eq!(counter.val_int.load(Ordering::Relaxed), u64::MAX);
    }

    #[test]
    fn test_nan_increment_is_rejected() {
        let counter = Counter::new();
        counter.inc_by(2.0).unwrap();
        assert_eq!(counter.inc_by(f64::NAN), Err(Error::NanIncrement));
        assert_eq!(counter.get(), 2.0);
    }

    #[test]
    fn test_large_amount_goes_to_float_cell() {
        let counter = Counter::new();
        counter.inc_by(1e30).unwrap();
        counter.inc();
        assert_eq!(counter.collect().value, 1e30 + 1.0);
    }

    #[test]
    fn test_name_is_normalized() {
        let vec = CounterVec::new(Opts::new("requests_total", "Requests."), &["code"]).unwrap();
        assert_eq!(vec.desc().fq_name, "requests");
    }

    #[test]
    fn test_exemplar_is_newest() {
        let vec = CounterVec::with_exemplar_sampler(
            Opts::new("jobs", "Jobs."),
            &[],
            recording_factory(),
        )
        .unwrap();
        let counter = vec.with_label_values(&[]);
        counter
            .inc_with_exemplar(1.0, &LabelSet::new([("trace_id", "a")]).unwrap())
            .unwrap();
        thread::sleep(std::time::Duration::from_millis(2));
        counter
            .inc_with_exemplar(2.0, &LabelSet::new([("trace_id", "b")]).unwrap())
            .unwrap();
        counter.inc();

        let s = counter.collect();
        assert_eq!(s.value, 4.0);
        let exemplar = s.exemplar.unwrap();
        assert_eq!(exemplar.value, 2.0);
        assert_eq!(exemplar.labels.get("trace_id"), Some("b"));
    }

    #[test]
    fn test_vec_collect() {
        let vec = CounterVec::new(Opts::new("hits", "Hits.").namespace("cache"), &["tier"]).unwrap();
        vec.with_label_values(&["l1"]).inc_by(3.0).unwrap();
        vec.with_label_values(&["l2"]).inc();

        let family = vec.collect();
        assert_eq!(family.name, "cache_hits");
        assert_eq!(family.metric_type, MetricType::Counter);
        let values: Vec<f64> = family
            .data_points
            .iter()
            .map(|p| match &p.snapshot {
                Snapshot::Counter(c) => c.value,
                other => panic!("unexpected snapshot {:?}", other),
            })
            .collect();
        assert_eq!(values, vec![3.0, 1.0]);
    }

    #[test]
    fn test_concurrent_increments() {
        let counter = Arc::new(Counter::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        counter.inc();
                        counter.inc_by(0.5).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.get(), 12_000.0);
    }
}
