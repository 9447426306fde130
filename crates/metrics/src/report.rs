//! Run reports.

use crate::names;
use crate::outcome::FailureLedger;
use crate::registry::{Metric, MetricsRegistry};
use fleetload_types::{EndpointId, Outcome, Phase};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Latency statistics (microseconds).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub count: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
}

impl LatencyStats {
    pub(crate) fn from_histogram(histogram: &hdrhistogram::Histogram<u64>) -> Self {
        if histogram.is_empty() {
            return Self::default();
        }
        Self {
            count: histogram.len(),
            min_us: histogram.min(),
            max_us: histogram.max(),
            mean_us: histogram.mean() as u64,
            p50_us: histogram.value_at_quantile(0.50),
            p95_us: histogram.value_at_quantile(0.95),
            p99_us: histogram.value_at_quantile(0.99),
        }
    }

    /// Formats latency as a human-readable string.
    pub fn format_ms(&self) -> String {
        if self.count == 0 {
            "N/A".to_string()
        } else {
            format!(
                "p50={:.1}ms p95={:.1}ms p99={:.1}ms max={:.1}ms",
                self.p50_us as f64 / 1000.0,
                self.p95_us as f64 / 1000.0,
                self.p99_us as f64 / 1000.0,
                self.max_us as f64 / 1000.0
            )
        }
    }
}

/// Totals of one lifecycle phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub success: u64,
    pub failure: u64,
    pub timeout: u64,
    /// Endpoints that reported at least one failure or timeout.
    pub problem_endpoints: Vec<EndpointId>,
    /// Latency of the phase, when endpoints measured it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencyStats>,
}

impl PhaseReport {
    pub fn count(&self, outcome: Outcome) -> u64 {
        match outcome {
            Outcome::Success => self.success,
            Outcome::Failure => self.failure,
            Outcome::Timeout => self.timeout,
        }
    }

    pub fn total(&self) -> u64 {
        self.success + self.failure + self.timeout
    }
}

/// Scheduler activity over the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerTotals {
    pub starts: u64,
    pub refresh_triggered: u64,
    pub refresh_starved: u64,
    pub stops: u64,
}

/// Snapshot of the outcome counters.
///
/// A report rendered while the run is active is a lower bound of the final
/// totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// One entry per phase, in lifecycle order.
    pub phases: Vec<PhaseReport>,
    pub scheduler: SchedulerTotals,
}

impl Report {
    pub fn phase(&self, phase: Phase) -> &PhaseReport {
        &self.phases[phase as usize]
    }

    /// Total count of one (phase, outcome) pair.
    pub fn total(&self, phase: Phase, outcome: Outcome) -> u64 {
        self.phase(phase).count(outcome)
    }

    /// Whether any endpoint reported a failure or timeout.
    pub fn has_problems(&self) -> bool {
        self.phases.iter().any(|p| p.failure + p.timeout > 0)
    }

    /// Generates a JSON report.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// How many problem endpoints the text report lists per phase.
const LISTED_PROBLEM_ENDPOINTS: usize = 20;

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "=".repeat(60))?;
        writeln!(f, "LOAD RUN RESULTS")?;
        writeln!(f, "{}", "=".repeat(60))?;
        writeln!(
            f,
            "{:<16} {:>12} {:>12} {:>12}",
            "phase", "success", "failure", "timeout"
        )?;
        for p in &self.phases {
            writeln!(
                f,
                "{:<16} {:>12} {:>12} {:>12}",
                p.phase.as_str(),
                p.success,
                p.failure,
                p.timeout
            )?;
        }

        for p in &self.phases {
            if let Some(latency) = &p.latency {
                writeln!(f, "latency {:<8} {}", p.phase.as_str(), latency.format_ms())?;
            }
        }

        for p in self.phases.iter().filter(|p| !p.problem_endpoints.is_empty()) {
            let listed: Vec<&str> = p
                .problem_endpoints
                .iter()
                .take(LISTED_PROBLEM_ENDPOINTS)
                .map(EndpointId::as_str)
                .collect();
            let more = p.problem_endpoints.len().saturating_sub(listed.len());
            write!(
                f,
                "{} problems on {} endpoint(s): {}",
                p.phase.as_str(),
                p.problem_endpoints.len(),
                listed.join(", ")
            )?;
            if more > 0 {
                write!(f, " (+{} more)", more)?;
            }
            writeln!(f)?;
        }

        writeln!(
            f,
            "scheduler: starts={} refresh.triggered={} refresh.starved={} stops={}",
            self.scheduler.starts,
            self.scheduler.refresh_triggered,
            self.scheduler.refresh_starved,
            self.scheduler.stops
        )?;
        write!(f, "{}", "=".repeat(60))
    }
}

/// Renders [`Report`]s from the registry and the failure ledger.
///
/// Read-only: rendering never registers metrics, so it is safe to call at any
/// time during a run.
#[derive(Debug, Clone)]
pub struct ReportAggregator {
    registry: MetricsRegistry,
    ledger: Arc<FailureLedger>,
}

impl ReportAggregator {
    pub fn new(registry: MetricsRegistry, ledger: Arc<FailureLedger>) -> Self {
        Self { registry, ledger }
    }

    pub fn render(&self) -> Report {
        let phases = Phase::ALL
            .iter()
            .map(|&phase| {
                let count = |outcome| {
                    self.registry
                        .counter_value(&names::outcome_counter(phase, outcome))
                };
                let latency = match self.registry.get(&names::latency_histogram(phase)) {
                    Some(Metric::Histogram(h)) if !h.is_empty() => Some(h.stats()),
                    _ => None,
                };
                PhaseReport {
                    phase,
                    success: count(Outcome::Success),
                    failure: count(Outcome::Failure),
                    timeout: count(Outcome::Timeout),
                    problem_endpoints: self.ledger.endpoints(phase),
                    latency,
                }
            })
            .collect();

        let scheduler = SchedulerTotals {
            starts: self.registry.counter_value(names::SCHEDULER_STARTS),
            refresh_triggered: self
                .registry
                .counter_value(names::SCHEDULER_REFRESH_TRIGGERED),
            refresh_starved: self.registry.counter_value(names::SCHEDULER_REFRESH_STARVED),
            stops: self.registry.counter_value(names::SCHEDULER_STOPS),
        };

        Report { phases, scheduler }
    }
}
