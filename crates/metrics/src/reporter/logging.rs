use crate::registry::{MetricValue, MetricsRegistry};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Logs every registry metric at `info`.
#[derive(Debug, Clone)]
pub struct LogReporter {
    registry: MetricsRegistry,
    period: Duration,
}

impl LogReporter {
    pub fn new(registry: MetricsRegistry, period: Duration) -> Self {
        Self { registry, period }
    }

    /// Log the current value of every metric once. Returns how many metrics
    /// were logged.
    pub fn report_once(&self) -> usize {
        let snapshot = self.registry.snapshot();
        for (name, value) in &snapshot {
            match value {
                MetricValue::Counter(count) => info!(metric = %name, count, "Metric"),
                MetricValue::Gauge(value) => info!(metric = %name, value, "Metric"),
                MetricValue::Histogram(stats) if stats.count > 0 => {
                    info!(metric = %name, count = stats.count, latency = %stats.format_ms(), "Metric")
                }
                MetricValue::Histogram(_) => {}
            }
        }
        snapshot.len()
    }

    /// Report every `period` until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + self.period,
                self.period,
            );
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.report_once();
                    }
                }
            }
            self.report_once();
        })
    }
}
