//! Process-wide metrics registry.
//!
//! Metrics are registered by name with compare-and-register semantics: the
//! first registration creates the metric, later registrations of the same
//! kind get a handle to the same instance, and a registration of another kind
//! is a [`ConfigurationError::IncompatibleMetric`].
//!
//! Handles are cheap clones sharing state:
//! - [`Counter`] and [`Gauge`] are single atomics
//! - [`Histogram`] is an hdrhistogram behind a parking_lot mutex, locked only
//!   for the duration of one `record`

use crate::report::LatencyStats;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fleetload_types::{ConfigurationError, MetricKind};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Highest latency tracked by histograms (60 s, in microseconds).
const HISTOGRAM_MAX_MICROS: u64 = 60_000_000;

/// Monotonic counter.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inc(&self) {
        self.add(1);
    }

    #[inline]
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Last-written value.
#[derive(Debug, Clone, Default)]
pub struct Gauge(Arc<AtomicI64>);

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Latency histogram (values in microseconds).
#[derive(Debug, Clone)]
pub struct Histogram(Arc<parking_lot::Mutex<hdrhistogram::Histogram<u64>>>);

impl Histogram {
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::<u64>::new_with_bounds(1, HISTOGRAM_MAX_MICROS, 3)
            .expect("constant histogram bounds are valid");
        Self(Arc::new(parking_lot::Mutex::new(histogram)))
    }

    /// Record one latency. Values above the tracked range are clamped.
    pub fn record(&self, latency: Duration) {
        let micros = (latency.as_micros() as u64).max(1);
        self.0.lock().saturating_record(micros);
    }

    /// Number of recorded values.
    pub fn len(&self) -> u64 {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Summary statistics of everything recorded so far.
    pub fn stats(&self) -> LatencyStats {
        let histogram = self.0.lock().clone();
        LatencyStats::from_histogram(&histogram)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered metric.
#[derive(Debug, Clone)]
pub enum Metric {
    Counter(Counter),
    Gauge(Gauge),
    Histogram(Histogram),
}

impl Metric {
    pub fn kind(&self) -> MetricKind {
        match self {
            Metric::Counter(_) => MetricKind::Counter,
            Metric::Gauge(_) => MetricKind::Gauge,
            Metric::Histogram(_) => MetricKind::Histogram,
        }
    }

    /// Current value of the metric.
    pub fn value(&self) -> MetricValue {
        match self {
            Metric::Counter(c) => MetricValue::Counter(c.get()),
            Metric::Gauge(g) => MetricValue::Gauge(g.get()),
            Metric::Histogram(h) => MetricValue::Histogram(h.stats()),
        }
    }
}

/// Point-in-time value of one metric.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Counter(u64),
    Gauge(i64),
    Histogram(LatencyStats),
}

/// A metric handle type that can be stored in the registry.
pub trait RegistryMetric: Clone + Sized {
    const KIND: MetricKind;

    /// Borrow a handle of this type out of a stored metric, if the kinds match.
    fn from_metric(metric: &Metric) -> Option<Self>;

    fn into_metric(self) -> Metric;
}

impl RegistryMetric for Counter {
    const KIND: MetricKind = MetricKind::Counter;

    fn from_metric(metric: &Metric) -> Option<Self> {
        match metric {
            Metric::Counter(c) => Some(c.clone()),
            _ => None,
        }
    }

    fn into_metric(self) -> Metric {
        Metric::Counter(self)
    }
}

impl RegistryMetric for Gauge {
    const KIND: MetricKind = MetricKind::Gauge;

    fn from_metric(metric: &Metric) -> Option<Self> {
        match metric {
            Metric::Gauge(g) => Some(g.clone()),
            _ => None,
        }
    }

    fn into_metric(self) -> Metric {
        Metric::Gauge(self)
    }
}

impl RegistryMetric for Histogram {
    const KIND: MetricKind = MetricKind::Histogram;

    fn from_metric(metric: &Metric) -> Option<Self> {
        match metric {
            Metric::Histogram(h) => Some(h.clone()),
            _ => None,
        }
    }

    fn into_metric(self) -> Metric {
        Metric::Histogram(self)
    }
}

/// Concurrent map of named metrics.
///
/// Cloning the registry shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct MetricsRegistry {
    metrics: Arc<DashMap<String, Metric>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the metric registered under `name`, creating it with `factory` if
    /// absent.
    ///
    /// Concurrent callers converge on one instance: the map shard is locked
    /// while the entry is created, and `factory` runs at most once per name.
    pub fn register_or_get<M, F>(&self, name: &str, factory: F) -> Result<M, ConfigurationError>
    where
        M: RegistryMetric,
        F: FnOnce() -> M,
    {
        if let Some(existing) = self.metrics.get(name) {
            return Self::compatible(name, &existing);
        }

        match self.metrics.entry(name.to_string()) {
            Entry::Occupied(entry) => Self::compatible(name, entry.get()),
            Entry::Vacant(entry) => {
                let metric = factory();
                entry.insert(metric.clone().into_metric());
                tracing::trace!(metric = name, kind = %M::KIND, "Registered metric");
                Ok(metric)
            }
        }
    }

    fn compatible<M: RegistryMetric>(name: &str, existing: &Metric) -> Result<M, ConfigurationError> {
        M::from_metric(existing).ok_or_else(|| ConfigurationError::IncompatibleMetric {
            name: name.to_string(),
            existing: existing.kind(),
            requested: M::KIND,
        })
    }

    pub fn counter(&self, name: &str) -> Result<Counter, ConfigurationError> {
        self.register_or_get(name, Counter::new)
    }

    pub fn gauge(&self, name: &str) -> Result<Gauge, ConfigurationError> {
        self.register_or_get(name, Gauge::new)
    }

    pub fn histogram(&self, name: &str) -> Result<Histogram, ConfigurationError> {
        self.register_or_get(name, Histogram::new)
    }

    /// Look up a metric without registering it.
    pub fn get(&self, name: &str) -> Option<Metric> {
        self.metrics.get(name).map(|entry| entry.value().clone())
    }

    /// Current value of a counter, or 0 if no counter is registered under
    /// `name`.
    pub fn counter_value(&self, name: &str) -> u64 {
        match self.get(name) {
            Some(Metric::Counter(c)) => c.get(),
            _ => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Values of every metric, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, MetricValue)> {
        let mut values: Vec<(String, MetricValue)> = self
            .metrics
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().value()))
            .collect();
        values.sort_by(|a, b| a.0.cmp(&b.0));
        values
    }
}
