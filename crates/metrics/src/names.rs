//! Metric names shared by the recorder, the scheduler and the reports.

use fleetload_types::{Outcome, Phase};

/// Prefix of every per-endpoint outcome metric.
pub const ENDPOINT_PREFIX: &str = "fleetload.endpoint";

/// Start calls dispatched by the scheduler.
pub const SCHEDULER_STARTS: &str = "fleetload.scheduler.starts";

/// Refresh ticks that found an endpoint to refresh.
pub const SCHEDULER_REFRESH_TRIGGERED: &str = "fleetload.scheduler.refresh.triggered";

/// Refresh ticks where no endpoint accepted a refresh.
pub const SCHEDULER_REFRESH_STARVED: &str = "fleetload.scheduler.refresh.starved";

/// Stop calls dispatched by the scheduler.
pub const SCHEDULER_STOPS: &str = "fleetload.scheduler.stops";

/// Jobs waiting on or running in the endpoint worker pool.
pub const SCHEDULER_QUEUE_DEPTH: &str = "fleetload.scheduler.pool.queue_depth";

/// `fleetload.endpoint.<phase>.<outcome>`
pub fn outcome_counter(phase: Phase, outcome: Outcome) -> String {
    format!("{}.{}.{}", ENDPOINT_PREFIX, phase.as_str(), outcome.as_str())
}

/// `fleetload.endpoint.<phase>.latency`
pub fn latency_histogram(phase: Phase) -> String {
    format!("{}.{}.latency", ENDPOINT_PREFIX, phase.as_str())
}
