use slog::Logger;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use super::atomic_update::AtomicF64;
use super::collector::Collector;
use super::desc::{Desc, Opts};
use super::error::Result;
use super::exemplar::{oldest, ExemplarSampler, ExemplarSamplerFactory};
use super::labels::LabelSet;
use super::metric_vec::{Accumulator, MetricVec};
use super::snapshot::{GaugeSnapshot, MetricSnapshot, MetricType};

/// A value that can go up and down.
pub struct Gauge {
    val: AtomicF64,
    exemplars: Option<Box<dyn ExemplarSampler>>,
}

impl Default for Gauge {
    fn default() -> Self {
        Gauge::new()
    }
}

impl Gauge {
    pub fn new() -> Self {
        Gauge::with_exemplar_sampler(None)
    }

    fn with_exemplar_sampler(exemplars: Option<Box<dyn ExemplarSampler>>) -> Self {
        Gauge {
            val: AtomicF64::default(),
            exemplars,
        }
    }

    /// Replaces the value. Concurrent `set` calls are linearizable: the last
    /// store wins.
    pub fn set(&self, v: f64) {
        self.val.store(v, Ordering::Relaxed);
        self.sample(v, None);
    }

    pub fn set_with_exemplar(&self, v: f64, labels: &LabelSet) {
        self.val.store(v, Ordering::Relaxed);
        self.sample(v, Some(labels));
    }

    pub fn inc(&self) {
        self.add(1.0);
    }

    pub fn dec(&self) {
        self.add(-1.0);
    }

    pub fn add(&self, v: f64) {
        self.val.add(v);
        self.sample(v, None);
    }

    pub fn add_with_exemplar(&self, v: f64, labels: &LabelSet) {
        self.val.add(v);
        self.sample(v, Some(labels));
    }

    pub fn sub(&self, v: f64) {
        self.add(-v);
    }

    /// Sets the gauge to the current Unix time in seconds.
    pub fn set_to_current_time(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        self.set(now);
    }

    pub fn get(&self) -> f64 {
        self.val.load(Ordering::Relaxed)
    }

    fn sample(&self, v: f64, labels: Option<&LabelSet>) {
        if let Some(sampler) = &self.exemplars {
            sampler.observe(v, None, labels);
        }
    }

    pub fn collect(&self) -> GaugeSnapshot {
        let exemplar = self.exemplars.as_ref().and_then(|s| oldest(s.collect()));
        GaugeSnapshot {
            value: self.get(),
            exemplar,
        }
    }
}

impl Accumulator for Gauge {
    type Snapshot = GaugeSnapshot;

    fn collect(&self) -> GaugeSnapshot {
        Gauge::collect(self)
    }
}

pub struct GaugeVec {
    inner: MetricVec<Gauge>,
}

impl GaugeVec {
    pub fn new(opts: Opts, label_names: &[&str]) -> Result<Self> {
        GaugeVec::build(opts, label_names, None)
    }

    pub fn with_exemplar_sampler(
        opts: Opts,
        label_names: &[&str],
        factory: ExemplarSamplerFactory,
    ) -> Result<Self> {
        GaugeVec::build(opts, label_names, Some(factory))
    }

    fn build(
        opts: Opts,
        label_names: &[&str],
        factory: Option<ExemplarSamplerFactory>,
    ) -> Result<Self> {
        let desc = Desc::new(&opts, label_names, &[], "gauge")?;
        let inner = MetricVec::new(desc, move |_| {
            Gauge::with_exemplar_sampler(factory.as_ref().map(|f| f()))
        });
        Ok(GaugeVec { inner })
    }

    pub fn with_logger(self, logger: Logger) -> Self {
        GaugeVec {
            inner: self.inner.with_logger(logger),
        }
    }

    pub fn get_metric_with_label_values(&self, vals: &[&str]) -> Result<Arc<Gauge>> {
        self.inner.get_metric_with_label_values(vals)
    }

    pub fn with_label_values(&self, vals: &[&str]) -> Arc<Gauge> {
        self.inner.with_label_values(vals)
    }

    pub fn remove_label_values(&self, vals: &[&str]) -> bool {
        self.inner.remove_label_values(vals)
    }

    pub fn reset(&self) {
        self.inner.reset()
    }
}

impl Collector for GaugeVec {
    fn desc(&self) -> &Desc {
        self.inner.desc()
    }

    fn collect(&self) -> MetricSnapshot {
        self.inner.metric_snapshot(MetricType::Gauge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prometheus::exemplar::testing::recording_factory;
    use std::thread;

    #[test]
    fn test_gauge_ops() {
        let gauge = Gauge::new();
        gauge.inc();
        gauge.add(41.0);
        assert_eq!(gauge.get(), 42.0);
        gauge.dec();
        gauge.sub(1.5);
        assert_eq!(gauge.get(), 39.5);
        gauge.set(-3.0);
        assert_eq!(gauge.get(), -3.0);
    }

    #[test]
    fn test_set_to_current_time() {
        let gauge = Gauge::new();
        let before = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs_f64();
        gauge.set_to_current_time();
        assert!(gauge.get() >= before);
    }

    #[test]
    fn test_exemplar_is_oldest() {
        let vec = GaugeVec::with_exemplar_sampler(Opts::new("temp", "Temp."), &[], recording_factory())
            .unwrap();
        let gauge = vec.with_label_values(&[]);
        gauge.set_with_exemplar(20.0, &LabelSet::new([("sensor", "a")]).unwrap());
        thread::sleep(std::time::Duration::from_millis(2));
        gauge.add_with_exemplar(1.0, &LabelSet::new([("sensor", "b")]).unwrap());

        let s = gauge.collect();
        assert_eq!(s.value, 21.0);
        assert_eq!(s.exemplar.unwrap().labels.get("sensor"), Some("a"));
    }

    #[test]
    fn test_concurrent_add_and_sub() {
        let gauge = Arc::new(Gauge::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let gauge = Arc::clone(&gauge);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        if i % 2 == 0 {
                            gauge.add(2.0);
                        } else {
                            gauge.sub(1.0);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(gauge.get(), 4000.0);
    }

    #[test]
    fn test_vec_collect() {
        let vec = GaugeVec::new(Opts::new("queue_depth", "Depth."), &["queue"]).unwrap();
        vec.with_label_values(&["b"]).set(2.0);
        vec.with_label_values(&["a"]).set(1.0);
        let family = vec.collect();
        assert_eq!(family.metric_type, MetricType::Gauge);
        assert_eq!(family.data_points[0].labels.get("queue"), Some("a"));
        assert!(vec.remove_label_values(&["a"]));
        assert_eq!(vec.collect().data_points.len(), 1);
    }
}
