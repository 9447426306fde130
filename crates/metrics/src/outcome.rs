//! Outcome counting: the 12 phase x outcome counters, latency histograms and
//! the ledger of endpoints that reported problems.

use crate::names;
use crate::registry::{Counter, Histogram, MetricsRegistry};
use dashmap::DashSet;
use fleetload_core::OutcomeObserver;
use fleetload_types::{ConfigurationError, EndpointId, Outcome, OutcomeEvent, Phase};
use std::sync::Arc;
use tracing::{debug, trace};

const PHASES: usize = Phase::ALL.len();
const OUTCOMES: usize = Outcome::ALL.len();

fn slot(phase: Phase, outcome: Outcome) -> usize {
    phase as usize * OUTCOMES + outcome as usize
}

/// Handles to the 12 `fleetload.endpoint.<phase>.<outcome>` counters.
#[derive(Debug, Clone)]
pub struct OutcomeCounters {
    counters: Vec<Counter>,
}

impl OutcomeCounters {
    /// Register (or look up) every outcome counter.
    pub fn register(registry: &MetricsRegistry) -> Result<Self, ConfigurationError> {
        let mut counters = Vec::with_capacity(PHASES * OUTCOMES);
        for phase in Phase::ALL {
            for outcome in Outcome::ALL {
                counters.push(registry.counter(&names::outcome_counter(phase, outcome))?);
            }
        }
        Ok(Self { counters })
    }

    pub fn get(&self, phase: Phase, outcome: Outcome) -> &Counter {
        &self.counters[slot(phase, outcome)]
    }
}

/// Endpoints that reported at least one failure or timeout, per phase.
#[derive(Debug)]
pub struct FailureLedger {
    by_phase: [DashSet<EndpointId>; PHASES],
}

impl FailureLedger {
    pub fn new() -> Self {
        Self {
            by_phase: std::array::from_fn(|_| DashSet::new()),
        }
    }

    /// Mark an endpoint as having had a problem in `phase`.
    pub fn mark(&self, phase: Phase, endpoint: &EndpointId) {
        let set = &self.by_phase[phase as usize];
        if !set.contains(endpoint) {
            set.insert(endpoint.clone());
        }
    }

    pub fn contains(&self, phase: Phase, endpoint: &EndpointId) -> bool {
        self.by_phase[phase as usize].contains(endpoint)
    }

    /// Marked endpoints of `phase`, sorted.
    pub fn endpoints(&self, phase: Phase) -> Vec<EndpointId> {
        let mut endpoints: Vec<EndpointId> = self.by_phase[phase as usize]
            .iter()
            .map(|id| id.key().clone())
            .collect();
        endpoints.sort();
        endpoints
    }

    pub fn is_empty(&self) -> bool {
        self.by_phase.iter().all(DashSet::is_empty)
    }
}

impl Default for FailureLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// [`OutcomeObserver`] that counts every event in the registry.
///
/// One recorder is registered per endpoint; all of them resolve to the same
/// counters and share one [`FailureLedger`].
#[derive(Debug, Clone)]
pub struct OutcomeRecorder {
    counters: OutcomeCounters,
    latencies: Vec<Histogram>,
    ledger: Arc<FailureLedger>,
}

impl OutcomeRecorder {
    pub fn register(
        registry: &MetricsRegistry,
        ledger: Arc<FailureLedger>,
    ) -> Result<Self, ConfigurationError> {
        let counters = OutcomeCounters::register(registry)?;
        let latencies = Phase::ALL
            .iter()
            .map(|phase| registry.histogram(&names::latency_histogram(*phase)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            counters,
            latencies,
            ledger,
        })
    }

    pub fn counters(&self) -> &OutcomeCounters {
        &self.counters
    }

    pub fn ledger(&self) -> &Arc<FailureLedger> {
        &self.ledger
    }
}

impl OutcomeObserver for OutcomeRecorder {
    fn on_outcome(&self, event: &OutcomeEvent) {
        self.counters.get(event.phase, event.outcome).inc();
        if let Some(latency) = event.latency {
            self.latencies[event.phase as usize].record(latency);
        }

        match event.outcome {
            Outcome::Success => {}
            Outcome::Failure => {
                self.ledger.mark(event.phase, &event.endpoint);
                match &event.detail {
                    Some(detail) => {
                        debug!(
                            endpoint = %event.endpoint,
                            phase = %event.phase,
                            reason = %detail.summary(),
                            "Lifecycle action failed"
                        );
                        let chain = detail.chain();
                        if !chain.is_empty() {
                            trace!(endpoint = %event.endpoint, phase = %event.phase, ?chain, "Failure cause chain");
                        }
                    }
                    None => {
                        debug!(endpoint = %event.endpoint, phase = %event.phase, "Lifecycle action failed");
                    }
                }
            }
            Outcome::Timeout => {
                self.ledger.mark(event.phase, &event.endpoint);
                debug!(endpoint = %event.endpoint, phase = %event.phase, "Lifecycle action timed out");
            }
        }
    }
}
