//! Per-series container: one accumulator per label-value tuple.

use dashmap::DashMap;
use slog::{debug, o, Logger};
use std::sync::Arc;

use super::desc::Desc;
use super::error::{Error, Result};
use super::fnv::FnvBuildHasher;
use super::promslog;
use super::snapshot::{DataPoint, MetricSnapshot, MetricType, Snapshot};

/// Numeric state of a single series that can be snapshotted.
pub trait Accumulator: Send + Sync + 'static {
    type Snapshot: Into<Snapshot>;

    fn collect(&self) -> Self::Snapshot;
}

type NewMetric<M> = Box<dyn Fn(&Logger) -> M + Send + Sync>;

/// Maps label values to accumulators, creating each one lazily and exactly
/// once per tuple.
pub struct MetricVec<M: Accumulator> {
    desc: Desc,
    children: DashMap<Vec<String>, Arc<M>, FnvBuildHasher>,
    new_metric: NewMetric<M>,
    logger: Logger,
}

impl<M: Accumulator> MetricVec<M> {
    /// `new_metric` receives a logger scoped to the new series.
    pub fn new(desc: Desc, new_metric: impl Fn(&Logger) -> M + Send + Sync + 'static) -> Self {
        MetricVec {
            desc,
            children: DashMap::default(),
            new_metric: Box::new(new_metric),
            logger: promslog::discard(),
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger.new(o!("metric" => self.desc.fq_name.clone()));
        self
    }

    pub fn desc(&self) -> &Desc {
        &self.desc
    }

    fn check_cardinality(&self, vals: &[&str]) -> Result<()> {
        let expected = self.desc.variable_labels.len();
        if vals.len() != expected {
            return Err(Error::InconsistentCardinality {
                expected,
                got: vals.len(),
            });
        }
        Ok(())
    }

    /// Returns the accumulator for the given label values, creating it if
    /// this is the first use of the tuple.
    pub fn get_metric_with_label_values(&self, vals: &[&str]) -> Result<Arc<M>> {
        self.check_cardinality(vals)?;
        let key: Vec<String> = vals.iter().map(|v| v.to_string()).collect();
        if let Some(metric) = self.children.get(&key) {
            return Ok(Arc::clone(metric.value()));
        }

        let metric = self
            .children
            .entry(key)
            .or_insert_with(|| {
                debug!(self.logger, "creating series"; "labels" => ?vals);
                let logger = self.logger.new(o!("series" => vals.join(",")));
                Arc::new((self.new_metric)(&logger))
            })
            .value()
            .clone();
        Ok(metric)
    }

    /// Like [`MetricVec::get_metric_with_label_values`], but panics if the
    /// number of values does not match the number of label names.
    pub fn with_label_values(&self, vals: &[&str]) -> Arc<M> {
        self.get_metric_with_label_values(vals)
            .unwrap_or_else(|e| panic!("{}", e))
    }

    /// Removes the series for the given label values. Returns `false` if no
    /// such series exists.
    pub fn remove_label_values(&self, vals: &[&str]) -> bool {
        if self.check_cardinality(vals).is_err() {
            return false;
        }
        let key: Vec<String> = vals.iter().map(|v| v.to_string()).collect();
        let removed = self.children.remove(&key).is_some();
        if removed {
            debug!(self.logger, "removed series"; "labels" => ?vals);
        }
        removed
    }

    /// Drops every series.
    pub fn reset(&self) {
        self.children.clear();
        debug!(self.logger, "cleared all series");
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Snapshots every series, ordered by label values.
    pub fn collect(&self) -> Vec<DataPoint<M::Snapshot>> {
        if self.desc.variable_labels.is_empty() && self.children.is_empty() {
            // A metric without labels reports zero before its first use.
            let _ = self.get_metric_with_label_values(&[]);
        }

        let mut series: Vec<(Vec<String>, Arc<M>)> = self
            .children
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        series.sort_by(|a, b| a.0.cmp(&b.0));

        series
            .into_iter()
            .map(|(values, metric)| DataPoint {
                labels: self.desc.const_labels.merge(&self.desc.variable_labels, &values),
                snapshot: metric.collect(),
            })
            .collect()
    }

    pub(crate) fn metric_snapshot(&self, metric_type: MetricType) -> MetricSnapshot {
        MetricSnapshot {
            name: self.desc.fq_name.clone(),
            help: self.desc.help.clone(),
            metric_type,
            data_points: self
                .collect()
                .into_iter()
                .map(|p| DataPoint {
                    labels: p.labels,
                    snapshot: p.snapshot.into(),
                })
                .collect(),
        }
    }
}
