//! The run timeline.
//!
//! One tokio task owns the whole schedule of a run. Its loop waits on, in
//! priority order:
//!
//! 1. external commands (stop)
//! 2. the run duration deadline
//! 3. the next staggered start deadline
//! 4. the next refresh tick
//!
//! The task never performs endpoint I/O: `start` and `stop` are handed to the
//! [`Dispatch`] pool, and `trigger_refresh` only asks the endpoint to schedule
//! its own refresh.

use crate::config::ScheduleConfig;
use crate::shutdown::ShutdownTracker;
use crate::stagger::{start_offsets, RoundRobinCursor};
use crate::state::RunStateCell;
use fleetload_core::Fleet;
use fleetload_dispatch::Dispatch;
use fleetload_metrics::{names, Counter, Gauge, MetricsRegistry};
use fleetload_types::{ConfigurationError, RunState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

/// Commands accepted by a running timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Stop { deregister: bool },
}

/// The scheduler's own metrics.
#[derive(Debug, Clone)]
struct SchedulerMetrics {
    starts: Counter,
    refresh_triggered: Counter,
    refresh_starved: Counter,
    stops: Counter,
    queue_depth: Gauge,
}

impl SchedulerMetrics {
    fn register(registry: &MetricsRegistry) -> Result<Self, ConfigurationError> {
        Ok(Self {
            starts: registry.counter(names::SCHEDULER_STARTS)?,
            refresh_triggered: registry.counter(names::SCHEDULER_REFRESH_TRIGGERED)?,
            refresh_starved: registry.counter(names::SCHEDULER_REFRESH_STARVED)?,
            stops: registry.counter(names::SCHEDULER_STOPS)?,
            queue_depth: registry.gauge(names::SCHEDULER_QUEUE_DEPTH)?,
        })
    }
}

/// A validated, not yet running schedule bound to a fleet.
pub struct Scheduler {
    config: ScheduleConfig,
    fleet: Fleet,
    dispatch: Arc<dyn Dispatch>,
    state: Arc<RunStateCell>,
    metrics: SchedulerMetrics,
}

impl Scheduler {
    /// Bind a schedule to a fleet.
    ///
    /// Fails if the configuration is invalid, does not match the fleet, or if
    /// the scheduler metrics clash with metrics already in the registry.
    pub fn new(
        config: ScheduleConfig,
        fleet: Fleet,
        dispatch: Arc<dyn Dispatch>,
        registry: &MetricsRegistry,
        state: Arc<RunStateCell>,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        if config.endpoints != fleet.len() {
            return Err(ConfigurationError::FleetSizeMismatch {
                expected: config.endpoints,
                actual: fleet.len(),
            });
        }
        let metrics = SchedulerMetrics::register(registry)?;
        Ok(Self {
            config,
            fleet,
            dispatch,
            state,
            metrics,
        })
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    /// Start the timeline. The first start call is issued immediately.
    pub fn spawn(self) -> SchedulerHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let completed = CancellationToken::new();
        let fleet = self.fleet.clone();
        let dispatch = Arc::clone(&self.dispatch);
        let stops = self.metrics.stops.clone();

        self.state.advance(RunState::Starting);
        let task = tokio::spawn(self.run(commands_rx, completed.clone()));

        SchedulerHandle {
            commands: commands_tx,
            completed,
            task: Some(task),
            fleet,
            dispatch,
            stops,
        }
    }

    async fn run(
        self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        completed: CancellationToken,
    ) -> ShutdownTracker {
        let t0 = Instant::now();
        let endpoints = self.fleet.len();
        let offsets = start_offsets(self.config.start.as_ref(), endpoints);
        let deadline = self.config.duration.map(|d| t0 + d);
        let mut ticker = self.config.refresh_interval().map(|period| {
            let mut ticker = tokio::time::interval_at(t0 + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });
        let mut cursor = RoundRobinCursor::new(endpoints);
        let mut next_start = 0;

        info!(
            endpoints,
            stagger = ?offsets.last().copied().unwrap_or_default(),
            refresh_interval = ?self.config.refresh_interval(),
            duration = ?self.config.duration,
            "Starting fleet"
        );

        let deregister = loop {
            let next_start_at = offsets.get(next_start).map(|offset| t0 + *offset);

            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(Command::Stop { deregister }) => {
                        info!(deregister, "Stop requested");
                        break deregister;
                    }
                    None => {
                        debug!("Scheduler handle dropped, stopping fleet");
                        break true;
                    }
                },
                _ = sleep_until(deadline) => {
                    info!(duration = ?self.config.duration, "Run duration elapsed");
                    break true;
                }
                _ = sleep_until(next_start_at) => {
                    self.start_endpoint(next_start);
                    next_start += 1;
                    if next_start == endpoints {
                        self.state.advance(RunState::Running);
                        info!(endpoints, "All endpoints started");
                    }
                }
                _ = tick(&mut ticker) => self.refresh_tick(&mut cursor),
            }
        };

        if next_start < endpoints {
            info!(
                started = next_start,
                skipped = endpoints - next_start,
                "Run ended before every endpoint was started"
            );
        }

        self.state.advance(RunState::Stopping);
        let tracker = ShutdownTracker::stop_fleet(&self.fleet, self.dispatch.as_ref(), deregister);
        self.metrics.stops.add(tracker.len() as u64);
        info!(endpoints, deregister, "Stop issued to every endpoint");
        completed.cancel();
        tracker
    }

    fn start_endpoint(&self, index: usize) {
        let Some(member) = self.fleet.get(index) else {
            return;
        };
        let member = Arc::clone(member);
        trace!(endpoint = %member.id(), index, "Dispatching start");
        self.dispatch.spawn(Box::new(move || {
            member.start();
        }));
        self.metrics.starts.inc();
        self.metrics
            .queue_depth
            .set(self.dispatch.queue_depth() as i64);
    }

    fn refresh_tick(&self, cursor: &mut RoundRobinCursor) {
        let (force_rehandshake, abbreviated) = self.config.rehandshake.flags();
        let fleet = &self.fleet;
        let picked = cursor.sweep(|index| {
            fleet
                .get(index)
                .is_some_and(|member| member.trigger_refresh(force_rehandshake, abbreviated))
        });

        match picked {
            Some(index) => {
                self.metrics.refresh_triggered.inc();
                trace!(index, "Refresh triggered");
            }
            None => {
                self.metrics.refresh_starved.inc();
                trace!(attempts = fleet.len(), "No endpoint accepted a refresh");
            }
        }
        self.metrics
            .queue_depth
            .set(self.dispatch.queue_depth() as i64);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Control handle of a running timeline.
pub struct SchedulerHandle {
    commands: mpsc::UnboundedSender<Command>,
    completed: CancellationToken,
    task: Option<JoinHandle<ShutdownTracker>>,
    fleet: Fleet,
    dispatch: Arc<dyn Dispatch>,
    stops: Counter,
}

impl SchedulerHandle {
    /// Ask the timeline to stop the fleet. Ignored once the run has ended.
    pub fn stop(&self, deregister: bool) {
        if self.commands.send(Command::Stop { deregister }).is_err() {
            trace!("Stop requested after the timeline ended");
        }
    }

    /// Whether every stop call has been issued.
    pub fn is_completed(&self) -> bool {
        self.completed.is_cancelled()
    }

    /// Wait until every stop call has been issued.
    pub async fn completed(&self) {
        self.completed.cancelled().await;
    }

    /// Wait for completion, or give up after `timeout`. Returns whether the
    /// run completed.
    pub async fn completed_within(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.completed()).await.is_ok()
    }

    /// Wait for completion and take the in-flight stop calls.
    ///
    /// Returns `None` if they were already taken.
    pub async fn join(&mut self) -> Option<ShutdownTracker> {
        let task = self.task.take()?;
        match task.await {
            Ok(tracker) => Some(tracker),
            Err(e) => {
                error!(error = %e, "Scheduler timeline failed, stopping fleet directly");
                let tracker = ShutdownTracker::stop_fleet(&self.fleet, self.dispatch.as_ref(), true);
                self.stops.add(tracker.len() as u64);
                self.completed.cancel();
                Some(tracker)
            }
        }
    }
}
