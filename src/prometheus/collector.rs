use super::desc::Desc;
use super::snapshot::MetricSnapshot;

/// A metric family that can snapshot all of its series.
///
/// The exposition layer calls `collect` once per scrape. Implementations
/// never block writers; see the quiescence buffer.
pub trait Collector: Send + Sync {
    fn desc(&self) -> &Desc;

    fn collect(&self) -> MetricSnapshot;
}

/// Collects a heterogeneous set of families, in the given order.
pub fn collect_all(collectors: &[&dyn Collector]) -> Vec<MetricSnapshot> {
    collectors.iter().map(|c| c.collect()).collect()
}
