//! Metrics for fleetload.
//!
//! Every endpoint reports its lifecycle outcomes into one shared
//! [`MetricsRegistry`] through an [`OutcomeRecorder`]. The registry holds:
//!
//! - 12 outcome counters `fleetload.endpoint.<phase>.<outcome>`
//! - 4 latency histograms `fleetload.endpoint.<phase>.latency`
//! - the scheduler's own counters and queue depth gauge (see [`names`])
//!
//! A [`ReportAggregator`] turns the registry and the [`FailureLedger`] into a
//! [`Report`]. [`LogReporter`] and [`GraphiteReporter`] publish the registry
//! periodically while a run is active.

pub mod names;
mod outcome;
mod registry;
mod report;
mod reporter;

pub use outcome::{FailureLedger, OutcomeCounters, OutcomeRecorder};
pub use registry::{Counter, Gauge, Histogram, Metric, MetricValue, MetricsRegistry, RegistryMetric};
pub use report::{LatencyStats, PhaseReport, Report, ReportAggregator, SchedulerTotals};
pub use reporter::{
    GraphiteReporter, LogReporter, ReporterError, DEFAULT_GRAPHITE_ADDRESS, DEFAULT_POLLING_PERIOD,
};
