//! Configuration error type.

use std::fmt;
use thiserror::Error;

/// Kind of a metric held by a metrics registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Counter => write!(f, "counter"),
            MetricKind::Gauge => write!(f, "gauge"),
            MetricKind::Histogram => write!(f, "histogram"),
        }
    }
}

/// Invalid or conflicting run parameters.
///
/// Always surfaced before any endpoint is started.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    /// Two components disagree about the shape of a metric.
    #[error("metric {name} is already registered as a {existing}, cannot use it as a {requested}")]
    IncompatibleMetric {
        name: String,
        existing: MetricKind,
        requested: MetricKind,
    },

    /// More than one endpoint but no way to spread their start calls.
    #[error("a stagger window is required to start {endpoints} endpoints")]
    MissingStaggerWindow { endpoints: usize },

    /// Explicit start offsets do not match the fleet.
    #[error("invalid start offsets: {0}")]
    InvalidStartOffsets(String),

    /// Global refresh rate outside `1..=60000` per minute.
    #[error("refresh rate must be between 1 and 60000 per minute, got {0}")]
    InvalidRefreshRate(u32),

    /// Per-endpoint refresh period of zero.
    #[error("per-endpoint refresh period must be greater than zero")]
    InvalidRefreshPeriod,

    #[error("fleet must contain at least one endpoint")]
    EmptyFleet,

    /// The schedule was built for a different number of endpoints.
    #[error("schedule is configured for {expected} endpoints but the fleet has {actual}")]
    FleetSizeMismatch { expected: usize, actual: usize },

    /// A naming pattern could not be parsed.
    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A generated pre-shared key is not hexadecimal.
    #[error("pre-shared key {key:?} for endpoint {index} is not valid hex")]
    InvalidPskKey { index: usize, key: String },

    #[error("worker pool size must be greater than zero")]
    InvalidWorkerCount,

    /// A probability outside `0.0..=1.0`.
    #[error("{name} must be between 0.0 and 1.0, got {value}")]
    InvalidRatio { name: &'static str, value: f64 },

    #[error("minimum latency {min_ms} ms exceeds maximum latency {max_ms} ms")]
    InvalidLatencyRange { min_ms: u64, max_ms: u64 },

    /// A metrics reporter period of zero.
    #[error("{name} must be greater than zero")]
    InvalidReportPeriod { name: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incompatible_metric_message() {
        let err = ConfigurationError::IncompatibleMetric {
            name: "fleetload.endpoint.update.success".into(),
            existing: MetricKind::Gauge,
            requested: MetricKind::Counter,
        };
        assert_eq!(
            err.to_string(),
            "metric fleetload.endpoint.update.success is already registered as a gauge, cannot use it as a counter"
        );
    }
}
