//! Periodic metric reporters.
//!
//! Reporters run as tokio tasks until their [`CancellationToken`] fires, then
//! report one last time so the final values are never lost.
//!
//! [`CancellationToken`]: tokio_util::sync::CancellationToken

mod graphite;
mod logging;

pub use self::graphite::{GraphiteReporter, DEFAULT_GRAPHITE_ADDRESS, DEFAULT_POLLING_PERIOD};
pub use self::logging::LogReporter;

use thiserror::Error;

/// Errors from metric transports. Never fatal to a run.
#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("Failed to reach metrics server {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to send metrics: {0}")]
    Io(#[from] std::io::Error),
}
