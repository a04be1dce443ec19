use parking_lot::Mutex;
use serde::Deserialize;
use slog::Logger;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use super::atomic_update::AtomicF64;
use super::buffer::Buffer;
use super::collector::Collector;
use super::desc::{Desc, Opts};
use super::error::{Error, Result};
use super::labels::QUANTILE_LABEL;
use super::metric_vec::{Accumulator, MetricVec};
use super::snapshot::{MetricSnapshot, MetricType, QuantileValue, SummarySnapshot};

/// A target quantile together with its tolerated rank error.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Quantile {
    pub quantile: f64,
    pub error: f64,
}

impl Quantile {
    pub fn new(quantile: f64, error: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&quantile) {
            return Err(Error::InvalidQuantile(quantile));
        }
        if !(0.0..=1.0).contains(&error) {
            return Err(Error::InvalidQuantileError(error));
        }
        Ok(Quantile { quantile, error })
    }
}

/// Streaming quantile sketch. Implementations live outside this crate; the
/// summary only feeds values in and reads the configured quantiles out.
pub trait QuantileEstimator: Send {
    fn insert(&mut self, value: f64);

    fn get(&mut self, quantile: f64) -> f64;
}

/// Creates one estimator per series for the given quantiles.
pub type QuantileEstimatorFactory =
    Arc<dyn Fn(&[Quantile]) -> Box<dyn QuantileEstimator> + Send + Sync>;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SummaryOpts {
    #[serde(flatten)]
    pub common: Opts,

    // Quantiles reported by every series. Empty means count and sum only.
    pub quantiles: Vec<Quantile>,
}

impl From<Opts> for SummaryOpts {
    fn from(common: Opts) -> Self {
        SummaryOpts {
            common,
            quantiles: Vec::new(),
        }
    }
}

impl SummaryOpts {
    pub fn new(name: &str, help: &str) -> Self {
        Opts::new(name, help).into()
    }

    pub fn quantile(mut self, quantile: f64, error: f64) -> Self {
        self.quantiles.push(Quantile { quantile, error });
        self
    }

    fn validate(&self, has_estimator: bool) -> Result<Arc<Vec<Quantile>>> {
        let quantiles = self
            .quantiles
            .iter()
            .map(|q| Quantile::new(q.quantile, q.error))
            .collect::<Result<Vec<_>>>()?;
        if !quantiles.is_empty() && !has_estimator {
            return Err(Error::MissingQuantileEstimator);
        }
        Ok(Arc::new(quantiles))
    }
}

/// Count, sum and estimated quantiles of a stream of observations.
pub struct Summary {
    buffer: Buffer,
    quantiles: Arc<Vec<Quantile>>,
    estimator: Option<Mutex<Box<dyn QuantileEstimator>>>,
    sum: AtomicF64,
    count: AtomicU64,
    created: SystemTime,
}

impl Summary {
    /// Creates a standalone summary. `factory` is required when quantiles
    /// are configured.
    pub fn new(opts: &SummaryOpts, factory: Option<QuantileEstimatorFactory>) -> Result<Self> {
        let quantiles = opts.validate(factory.is_some())?;
        Ok(Summary::with_quantiles(quantiles, factory.as_ref()))
    }

    fn with_quantiles(
        quantiles: Arc<Vec<Quantile>>,
        factory: Option<&QuantileEstimatorFactory>,
    ) -> Self {
        let estimator = match factory {
            Some(f) if !quantiles.is_empty() => Some(Mutex::new(f(&quantiles))),
            _ => None,
        };
        Summary {
            buffer: Buffer::new(),
            quantiles,
            estimator,
            sum: AtomicF64::default(),
            count: AtomicU64::new(0),
            created: SystemTime::now(),
        }
    }

    /// Records `value`. NaN is silently dropped.
    pub fn observe(&self, value: f64) {
        if value.is_nan() {
            return;
        }
        if !self.buffer.append(value) {
            self.do_observe(value);
        }
    }

    fn do_observe(&self, value: f64) {
        if let Some(estimator) = &self.estimator {
            estimator.lock().insert(value);
        }
        self.sum.add(value);
        self.count.fetch_add(1, Ordering::Release);
    }

    pub fn collect(&self) -> SummarySnapshot {
        self.buffer.run_atomic(
            |expected| self.count.load(Ordering::Acquire) == expected,
            || SummarySnapshot {
                count: self.count.load(Ordering::Acquire),
                sum: self.sum.load(Ordering::Relaxed),
                quantiles: self.quantile_values(),
                created: self.created,
            },
            |v| self.do_observe(v),
        )
    }

    fn quantile_values(&self) -> Vec<QuantileValue> {
        let mut estimator = match &self.estimator {
            Some(e) => e.lock(),
            None => return Vec::new(),
        };
        self.quantiles
            .iter()
            .map(|q| QuantileValue {
                quantile: q.quantile,
                value: estimator.get(q.quantile),
            })
            .collect()
    }
}

impl Accumulator for Summary {
    type Snapshot = SummarySnapshot;

    fn collect(&self) -> SummarySnapshot {
        Summary::collect(self)
    }
}

pub struct SummaryVec {
    inner: MetricVec<Summary>,
}

impl SummaryVec {
    /// A summary family reporting count and sum only.
    pub fn new(opts: SummaryOpts, label_names: &[&str]) -> Result<Self> {
        SummaryVec::build(opts, label_names, None)
    }

    pub fn with_quantile_estimator(
        opts: SummaryOpts,
        label_names: &[&str],
        factory: QuantileEstimatorFactory,
    ) -> Result<Self> {
        SummaryVec::build(opts, label_names, Some(factory))
    }

    fn build(
        opts: SummaryOpts,
        label_names: &[&str],
        factory: Option<QuantileEstimatorFactory>,
    ) -> Result<Self> {
        let desc = Desc::new(&opts.common, label_names, &[QUANTILE_LABEL], "summary")?;
        let quantiles = opts.validate(factory.is_some())?;
        let inner = MetricVec::new(desc, move |_| {
            Summary::with_quantiles(Arc::clone(&quantiles), factory.as_ref())
        });
        Ok(SummaryVec { inner })
    }

    pub fn with_logger(self, logger: Logger) -> Self {
        SummaryVec {
            inner: self.inner.with_logger(logger),
        }
    }

    pub fn get_metric_with_label_values(&self, vals: &[&str]) -> Result<Arc<Summary>> {
        self.inner.get_metric_with_label_values(vals)
    }

    pub fn with_label_values(&self, vals: &[&str]) -> Arc<Summary> {
        self.inner.with_label_values(vals)
    }

    pub fn remove_label_values(&self, vals: &[&str]) -> bool {
        self.inner.remove_label_values(vals)
    }

    pub fn reset(&self) {
        self.inner.reset()
    }
}

impl Collector for SummaryVec {
    fn desc(&self) -> &Desc {
        self.inner.desc()
    }

    fn collect(&self) -> MetricSnapshot {
        self.inner.metric_snapshot(MetricType::Summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    // Keeps every value and answers with the exact nearest-rank quantile.
    #[derive(Default)]
    struct Exact(Vec<f64>);

    impl QuantileEstimator for Exact {
        fn insert(&mut self, value: f64) {
            self.0.push(value);
        }

        fn get(&mut self, quantile: f64) -> f64 {
            if self.0.is_empty() {
                return f64::NAN;
            }
            self.0.sort_by(f64::total_cmp);
            let rank = (quantile * self.0.len() as f64).ceil() as usize;
            self.0[rank.saturating_sub(1).min(self.0.len() - 1)]
        }
    }

    fn exact() -> QuantileEstimatorFactory {
        Arc::new(|_: &[Quantile]| Box::new(Exact::default()) as Box<dyn QuantileEstimator>)
    }

    fn median_and_p90() -> SummaryOpts {
        SummaryOpts::new("latency", "Latency.")
            .quantile(0.5, 0.01)
            .quantile(0.9, 0.01)
    }

    #[test]
    fn test_quantiles() {
        let summary = Summary::new(&median_and_p90(), Some(exact())).unwrap();
        for i in 1..=100 {
            summary.observe(i as f64);
        }
        summary.observe(f64::NAN);

        let s = summary.collect();
        assert_eq!(s.count, 100);
        assert_eq!(s.sum, 5050.0);
        assert_eq!(
            s.quantiles,
            vec![
                QuantileValue { quantile: 0.5, value: 50.0 },
                QuantileValue { quantile: 0.9, value: 90.0 },
            ]
        );
    }

    #[test]
    fn test_count_and_sum_only() {
        let summary = Summary::new(&SummaryOpts::new("bytes", "Bytes."), None).unwrap();
        summary.observe(3.0);
        summary.observe(4.5);
        let s = summary.collect();
        assert_eq!((s.count, s.sum), (2, 7.5));
        assert!(s.quantiles.is_empty());
    }

    #[test]
    fn test_invalid_options() {
        let opts = SummaryOpts::new("x", "x").quantile(1.5, 0.01);
        assert_eq!(Summary::new(&opts, Some(exact())).err(), Some(Error::InvalidQuantile(1.5)));

        let opts = SummaryOpts::new("x", "x").quantile(0.5, -0.1);
        assert_eq!(
            Summary::new(&opts, Some(exact())).err(),
            Some(Error::InvalidQuantileError(-0.1))
        );

        assert_eq!(
            Summary::new(&median_and_p90(), None).err(),
            Some(Error::MissingQuantileEstimator)
        );

        assert_eq!(
            SummaryVec::new(SummaryOpts::new("x", "x"), &["quantile"]).err(),
            Some(Error::ReservedLabelName {
                label: "quantile".into(),
                kind: "summary"
            })
        );
    }

    #[test]
    fn test_concurrent_observe_and_collect() {
        let summary = Arc::new(Summary::new(&median_and_p90(), Some(exact())).unwrap());
        let writers: Vec<_> = (0..4)
            .map(|_| {
                let summary = Arc::clone(&summary);
                thread::spawn(move || {
                    for _ in 0..5000 {
                        summary.observe(2.0);
                    }
                })
            })
            .collect();

        let mut last = 0;
        for _ in 0..50 {
            let s = summary.collect();
            assert!(s.count >= last);
            assert_eq!(s.sum, 2.0 * s.count as f64);
            last = s.count;
        }
        for w in writers {
            w.join().unwrap();
        }

        let s = summary.collect();
        assert_eq!(s.count, 20_000);
        assert_eq!(s.quantiles[0].value, 2.0);
    }

    #[test]
    fn test_vec_collect() {
        let vec = SummaryVec::with_quantile_estimator(median_and_p90(), &["route"], exact()).unwrap();
        vec.with_label_values(&["/a"]).observe(1.0);
        vec.with_label_values(&["/b"]).observe(2.0);

        let family = vec.collect();
        assert_eq!(family.metric_type, MetricType::Summary);
        assert_eq!(family.data_points.len(), 2);
        assert_eq!(family.data_points[1].labels.get("route"), Some("/b"));
    }

    #[test]
    fn test_opts_deserialize() {
        let opts: SummaryOpts = serde_json::from_str(
            r#"{"name": "rpc", "help": "RPC.", "quantiles": [{"quantile": 0.99, "error": 0.001}]}"#,
        )
        .unwrap();
        assert_eq!(opts.common.fq_name(), "rpc");
        assert_eq!(opts.quantiles, vec![Quantile { quantile: 0.99, error: 0.001 }]);
    }
}
