use super::ReporterError;
use crate::registry::{MetricValue, MetricsRegistry};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_GRAPHITE_ADDRESS: &str = "localhost:2003";

pub const DEFAULT_POLLING_PERIOD: Duration = Duration::from_secs(5);

/// Pushes registry snapshots to a Graphite server using the plaintext
/// protocol (`<name> <value> <unix-seconds>\n`), one TCP connection per push.
#[derive(Debug, Clone)]
pub struct GraphiteReporter {
    registry: MetricsRegistry,
    address: String,
    period: Duration,
    prefix: Option<String>,
}

impl GraphiteReporter {
    pub fn new(registry: MetricsRegistry, address: impl Into<String>) -> Self {
        Self {
            registry,
            address: address.into(),
            period: DEFAULT_POLLING_PERIOD,
            prefix: None,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Prepend `prefix.` to every metric name.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Render the current snapshot as plaintext protocol lines.
    pub fn render(&self, timestamp: u64) -> String {
        let mut out = String::new();
        for (name, value) in self.registry.snapshot() {
            let name = match &self.prefix {
                Some(prefix) => format!("{}.{}", prefix, name),
                None => name,
            };
            match value {
                MetricValue::Counter(count) => {
                    out.push_str(&format!("{} {} {}\n", name, count, timestamp))
                }
                MetricValue::Gauge(value) => {
                    out.push_str(&format!("{} {} {}\n", name, value, timestamp))
                }
                MetricValue::Histogram(stats) => {
                    for (suffix, v) in [
                        ("count", stats.count),
                        ("p50", stats.p50_us),
                        ("p95", stats.p95_us),
                        ("p99", stats.p99_us),
                        ("max", stats.max_us),
                    ] {
                        out.push_str(&format!("{}.{} {} {}\n", name, suffix, v, timestamp));
                    }
                }
            }
        }
        out
    }

    /// Push one snapshot. Returns the number of bytes sent.
    pub async fn push_once(&self) -> Result<usize, ReporterError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let payload = self.render(timestamp);
        if payload.is_empty() {
            return Ok(0);
        }

        let mut stream =
            TcpStream::connect(self.address.as_str())
                .await
                .map_err(|source| ReporterError::Connect {
                    address: self.address.clone(),
                    source,
                })?;
        stream.write_all(payload.as_bytes()).await?;
        stream.shutdown().await?;
        Ok(payload.len())
    }

    /// Push every `period` until `cancel` fires. Failed pushes are logged and
    /// retried on the next period.
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
                    _ = ticker.tick() => self.push_logged().await,
                }
            }
            self.push_logged().await;
        })
    }

    async fn push_logged(&self) {
        match self.push_once().await {
            Ok(bytes) => debug!(address = %self.address, bytes, "Pushed metrics to Graphite"),
            Err(e) => warn!(error = %e, "Graphite push failed"),
        }
    }
}
