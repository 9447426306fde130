//! The composition root of a run.

use crate::config::LaunchConfig;
use crate::error::LauncherError;
use fleetload_core::{EndpointContext, EndpointFactory, Fleet};
use fleetload_dispatch::{Dispatch, PooledDispatch};
use fleetload_metrics::{
    FailureLedger, GraphiteReporter, LogReporter, MetricsRegistry, OutcomeRecorder, Report,
    ReportAggregator,
};
use fleetload_scheduler::{RunStateCell, Scheduler, SchedulerHandle, ShutdownTracker};
use fleetload_types::RunState;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Result of waiting for a run with a timeout.
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    /// The run is still active.
    NotFinished,
    /// Every endpoint was stopped and destroyed.
    Finished(Report),
}

/// Creates a fleet, runs its schedule and reports on it.
///
/// ```text
///   new ──► start ──► [stop] ──► wait_to_end / wait_to_end_timeout / destroy
/// ```
///
/// `destroy` may be called from any state and is idempotent.
pub struct Launcher {
    config: LaunchConfig,
    registry: MetricsRegistry,
    ledger: Arc<FailureLedger>,
    dispatch: Arc<dyn Dispatch>,
    fleet: Fleet,
    state: Arc<RunStateCell>,
    scheduler: Option<Scheduler>,
    handle: Option<SchedulerHandle>,
    reporters: CancellationToken,
    reporter_tasks: Vec<JoinHandle<()>>,
}

impl Launcher {
    /// Create every endpoint on a dedicated worker pool sized for the fleet.
    pub fn new(config: LaunchConfig, factory: &dyn EndpointFactory) -> Result<Self, LauncherError> {
        config.validate()?;
        let dispatch = Arc::new(PooledDispatch::new(config.worker_pool())?);
        Self::assemble(config, factory, dispatch, MetricsRegistry::new())
    }

    /// Create every endpoint using the given pool and registry.
    ///
    /// Fails before any endpoint is started if the configuration is invalid,
    /// if an endpoint cannot be created, or if the registry already holds a
    /// metric of another kind under one of the names used here.
    pub fn assemble(
        config: LaunchConfig,
        factory: &dyn EndpointFactory,
        dispatch: Arc<dyn Dispatch>,
        registry: MetricsRegistry,
    ) -> Result<Self, LauncherError> {
        config.validate()?;
        let specs = config.endpoint_specs()?;
        let ledger = Arc::new(FailureLedger::new());
        let state = Arc::new(RunStateCell::new());

        info!(
            endpoints = specs.len(),
            server = %config.server_uri,
            mode = if config.bootstrap { "bootstrapping" } else { "registering" },
            "Creating endpoints"
        );

        let mut endpoints = Vec::with_capacity(specs.len());
        for spec in specs {
            let recorder = OutcomeRecorder::register(&registry, Arc::clone(&ledger))?;
            let ctx = EndpointContext::new(Arc::new(recorder), Arc::clone(&dispatch));
            endpoints.push(factory.create(spec, ctx)?);
        }
        let fleet = Fleet::new(endpoints)?;
        let range = config.range_description()?;
        info!(%range, "Endpoints range");

        let scheduler = Scheduler::new(
            config.schedule(),
            fleet.clone(),
            Arc::clone(&dispatch),
            &registry,
            Arc::clone(&state),
        )?;

        Ok(Self {
            config,
            registry,
            ledger,
            dispatch,
            fleet,
            state,
            scheduler: Some(scheduler),
            handle: None,
            reporters: CancellationToken::new(),
            reporter_tasks: Vec::new(),
        })
    }

    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    pub fn registry(&self) -> &MetricsRegistry {
        &self.registry
    }

    pub fn fleet(&self) -> &Fleet {
        &self.fleet
    }

    pub fn state(&self) -> RunState {
        self.state.get()
    }

    /// Start the schedule and the periodic reporters.
    pub fn start(&mut self) -> Result<(), LauncherError> {
        let Some(scheduler) = self.scheduler.take() else {
            return Err(LauncherError::InvalidState {
                operation: "start",
                state: self.state.get(),
            });
        };

        if let Some(period) = self.config.log_period {
            let reporter = LogReporter::new(self.registry.clone(), period);
            self.reporter_tasks.push(reporter.spawn(self.reporters.clone()));
        }
        if let Some(graphite) = &self.config.graphite {
            info!(
                address = %graphite.address,
                period = ?graphite.period,
                "Reporting to Graphite"
            );
            let reporter = GraphiteReporter::new(self.registry.clone(), graphite.address.clone())
                .with_period(graphite.period);
            self.reporter_tasks.push(reporter.spawn(self.reporters.clone()));
        }

        info!(
            window = ?self.config.start_window(),
            refresh = ?self.config.refresh,
            duration = ?self.config.duration,
            "Starting endpoints"
        );
        self.handle = Some(scheduler.spawn());
        Ok(())
    }

    /// Ask the run to stop every endpoint. A run that already ended ignores
    /// the request.
    pub fn stop(&self, deregister: bool) -> Result<(), LauncherError> {
        match &self.handle {
            Some(handle) => {
                handle.stop(deregister);
                Ok(())
            }
            None => Err(LauncherError::InvalidState {
                operation: "stop",
                state: self.state.get(),
            }),
        }
    }

    /// Wait until every stop call was issued, without destroying anything.
    /// Returns immediately if the run was never started.
    pub async fn completed(&self) {
        if let Some(handle) = &self.handle {
            handle.completed().await;
        }
    }

    /// Wait until the run ends, destroy every endpoint and return the final
    /// report.
    pub async fn wait_to_end(&mut self) -> Result<Report, LauncherError> {
        if self.state() == RunState::Destroyed {
            return Ok(self.report());
        }
        let Some(handle) = self.handle.as_mut() else {
            return Err(LauncherError::InvalidState {
                operation: "wait_to_end",
                state: self.state.get(),
            });
        };
        let tracker = handle.join().await;
        Ok(self.finish(tracker, true).await)
    }

    /// Like [`Launcher::wait_to_end`], but give up after `timeout` and leave
    /// the run active.
    pub async fn wait_to_end_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<RunStatus, LauncherError> {
        if self.state() == RunState::Destroyed {
            return Ok(RunStatus::Finished(self.report()));
        }
        let Some(handle) = self.handle.as_ref() else {
            return Err(LauncherError::InvalidState {
                operation: "wait_to_end",
                state: self.state.get(),
            });
        };
        if !handle.completed_within(timeout).await {
            return Ok(RunStatus::NotFinished);
        }
        self.wait_to_end().await.map(RunStatus::Finished)
    }

    /// Stop the run if it is still active, destroy every endpoint and shut
    /// the reporters down. Later calls only render the report.
    pub async fn destroy(&mut self, deregister: bool) -> Report {
        if self.state() == RunState::Destroyed {
            return self.report();
        }
        let tracker = match self.handle.as_mut() {
            Some(handle) => {
                handle.stop(deregister);
                handle.join().await
            }
            None => {
                self.scheduler = None;
                self.state.advance(RunState::Stopping);
                Some(ShutdownTracker::stop_fleet(
                    &self.fleet,
                    self.dispatch.as_ref(),
                    deregister,
                ))
            }
        };
        self.finish(tracker, deregister).await
    }

    /// Snapshot of the outcomes so far.
    pub fn report(&self) -> Report {
        ReportAggregator::new(self.registry.clone(), Arc::clone(&self.ledger)).render()
    }

    /// Destroy the fleet once its stops returned. Without a tracker (an
    /// earlier wait was abandoned after taking it), stop is issued again:
    /// members that already stopped ignore it and still get their destroy.
    async fn finish(&mut self, tracker: Option<ShutdownTracker>, deregister: bool) -> Report {
        let tracker = match tracker {
            Some(tracker) => tracker,
            None => {
                warn!("Shutdown was abandoned midway, stopping the fleet again");
                self.state.advance(RunState::Stopping);
                ShutdownTracker::stop_fleet(&self.fleet, self.dispatch.as_ref(), deregister)
            }
        };
        let deregister = tracker.deregister();
        let destroyed = tracker.destroy_fleet(self.dispatch.as_ref()).await;
        info!(destroyed, deregister, "Run ended");
        self.state.advance(RunState::Destroyed);

        self.reporters.cancel();
        for task in self.reporter_tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "Metrics reporter task failed");
            }
        }
        self.report()
    }
}

impl std::fmt::Debug for Launcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Launcher")
            .field("fleet", &self.fleet)
            .field("state", &self.state())
            .field("workers", &self.dispatch.workers())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetload_core::{EndpointError, EndpointSpec, SimulatedEndpoint};
    use fleetload_dispatch::{InlineDispatch, Job};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use fleetload_test_helpers::{Call, RecordingFactory};
    use fleetload_types::{ConfigurationError, MetricKind, Outcome, Phase};
    use tracing_test::traced_test;

    fn launch(config: LaunchConfig, factory: &RecordingFactory) -> Launcher {
        Launcher::assemble(
            config,
            factory,
            Arc::new(InlineDispatch::new()),
            MetricsRegistry::new(),
        )
        .unwrap()
    }

    /// Queues jobs until opened, then runs them inline.
    #[derive(Default)]
    struct GatedDispatch {
        queued: Mutex<Vec<Job>>,
        open: AtomicBool,
    }

    impl GatedDispatch {
        fn run_queued(&self) {
            let jobs = std::mem::take(&mut *self.queued.lock());
            for job in jobs {
                job();
            }
        }

        fn open(&self) {
            self.open.store(true, Ordering::SeqCst);
        }
    }

    impl Dispatch for GatedDispatch {
        fn spawn(&self, job: Job) {
            if self.open.load(Ordering::SeqCst) {
                job();
            } else {
                self.queued.lock().push(job);
            }
        }

        fn queue_depth(&self) -> usize {
            self.queued.lock().len()
        }

        fn workers(&self) -> usize {
            1
        }
    }

    fn assert_stopped_then_destroyed(factory: &RecordingFactory, endpoints: usize, deregister: bool) {
        for i in 0..endpoints {
            let teardown: Vec<_> = factory
                .log()
                .calls_for(i)
                .into_iter()
                .filter(|call| matches!(call, Call::Stop { .. } | Call::Destroy { .. }))
                .collect();
            assert_eq!(
                teardown,
                vec![Call::Stop { deregister }, Call::Destroy { deregister }],
                "endpoint {}",
                i
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_endpoint_bounded_run() {
        let factory = RecordingFactory::new();
        let config = LaunchConfig::new("coap://localhost:5683")
            .with_global_rate(60)
            .with_duration(Some(Duration::from_secs(120)));
        let mut launcher = launch(config, &factory);
        let t0 = tokio::time::Instant::now();

        launcher.start().unwrap();
        let report = launcher.wait_to_end().await.unwrap();

        assert_eq!(t0.elapsed(), Duration::from_secs(120));
        assert_eq!(launcher.state(), RunState::Destroyed);
        assert_stopped_then_destroyed(&factory, 1, true);

        let refreshes = report.total(Phase::Refresh, Outcome::Success);
        assert!((119..=121).contains(&refreshes), "refreshes: {}", refreshes);
        assert_eq!(report.total(Phase::Registration, Outcome::Success), 1);
        assert_eq!(report.total(Phase::Deregistration, Outcome::Success), 1);
        assert!(!report.has_problems());
    }

    #[tokio::test(start_paused = true)]
    async fn test_five_endpoints_without_refresh() {
        let factory = RecordingFactory::new();
        let config = LaunchConfig::default()
            .with_endpoints(5)
            .with_start_window(Duration::from_secs(40))
            .without_refresh()
            .with_duration(Some(Duration::from_secs(60)));
        let mut launcher = launch(config, &factory);
        let t0 = tokio::time::Instant::now();

        launcher.start().unwrap();
        assert_eq!(
            launcher
                .wait_to_end_timeout(Duration::from_secs(30))
                .await
                .unwrap(),
            RunStatus::NotFinished
        );
        assert!(launcher.state().is_active());

        let status = launcher
            .wait_to_end_timeout(Duration::from_secs(60))
            .await
            .unwrap();
        let RunStatus::Finished(report) = status else {
            panic!("run should have finished");
        };

        let offsets: Vec<_> = factory
            .log()
            .starts()
            .into_iter()
            .map(|(i, at)| (i, (at - t0).as_secs()))
            .collect();
        assert_eq!(offsets, vec![(0, 0), (1, 10), (2, 20), (3, 30), (4, 40)]);
        assert!(factory.log().refresh_attempts().is_empty());
        assert_eq!(report.total(Phase::Registration, Outcome::Success), 5);
        assert_stopped_then_destroyed(&factory, 5, true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_stop_without_deregistration() {
        let factory = RecordingFactory::new();
        let config = LaunchConfig::default()
            .with_endpoints(3)
            .with_start_window(Duration::from_secs(2))
            .with_global_rate(600);
        let mut launcher = launch(config, &factory);

        launcher.start().unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        launcher.stop(false).unwrap();
        let report = launcher.wait_to_end().await.unwrap();

        assert_stopped_then_destroyed(&factory, 3, false);
        assert_eq!(report.total(Phase::Deregistration, Outcome::Success), 0);
        assert!(report.total(Phase::Refresh, Outcome::Success) > 0);

        // Already destroyed: nothing more is delivered.
        launcher.destroy(true).await;
        assert_stopped_then_destroyed(&factory, 3, false);
        assert!(launcher.wait_to_end().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_before_start() {
        let factory = RecordingFactory::new();
        let mut launcher = launch(
            LaunchConfig::default()
                .with_endpoints(2)
                .with_start_window(Duration::from_secs(1)),
            &factory,
        );

        assert!(matches!(
            launcher.stop(true),
            Err(LauncherError::InvalidState { operation: "stop", state: RunState::Created })
        ));

        launcher.destroy(false).await;
        launcher.destroy(true).await;

        assert_eq!(launcher.state(), RunState::Destroyed);
        assert!(factory.log().starts().is_empty());
        assert_stopped_then_destroyed(&factory, 2, false);
        assert!(matches!(
            launcher.start(),
            Err(LauncherError::InvalidState { operation: "start", .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_after_abandoned_wait() {
        let factory = RecordingFactory::new();
        let dispatch = Arc::new(GatedDispatch::default());
        let config = LaunchConfig::default()
            .without_refresh()
            .with_duration(Some(Duration::from_secs(1)));
        let mut launcher =
            Launcher::assemble(config, &factory, dispatch.clone(), MetricsRegistry::new()).unwrap();

        launcher.start().unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        // Start and stop run; the destroy queued by the wait below never does.
        dispatch.run_queued();
        tokio::select! {
            biased;
            _ = launcher.wait_to_end() => panic!("destroy should still be queued"),
            _ = std::future::ready(()) => {}
        }
        assert_eq!(launcher.state(), RunState::Stopping);

        dispatch.open();
        launcher.destroy(false).await;

        assert_eq!(launcher.state(), RunState::Destroyed);
        let teardown: Vec<_> = factory
            .log()
            .calls_for(0)
            .into_iter()
            .filter(|call| matches!(call, Call::Stop { .. } | Call::Destroy { .. }))
            .collect();
        assert_eq!(
            teardown,
            vec![Call::Stop { deregister: true }, Call::Destroy { deregister: false }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_rejected() {
        let factory = RecordingFactory::new();
        let mut launcher = launch(LaunchConfig::default(), &factory);

        launcher.start().unwrap();
        assert!(matches!(
            launcher.start(),
            Err(LauncherError::InvalidState { operation: "start", .. })
        ));
        launcher.destroy(true).await;
    }

    #[test]
    fn test_specs_reach_the_factory() {
        let factory = RecordingFactory::new();
        let config = LaunchConfig::new("coaps://localhost:5684")
            .with_endpoints(2)
            .with_start_window(Duration::ZERO)
            .with_duration(Some(Duration::from_secs(900)));
        let _launcher = launch(config, &factory);

        let specs = factory.specs();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1].id.as_str(), "LESHAN00000002");
        assert_eq!(specs[1].psk_identity.as_deref(), Some("LESHAN00000002"));
        assert_eq!(specs[1].lifetime, Duration::from_secs(900));
        assert!(specs[1].secure);
    }

    #[test]
    #[traced_test]
    fn test_range_logged_on_creation() {
        let factory = RecordingFactory::new();
        let config = LaunchConfig::new("coap://localhost:5683")
            .with_endpoints(3)
            .with_start_window(Duration::from_secs(3));
        let _launcher = launch(config, &factory);

        assert!(logs_contain("Endpoints range"));
        assert!(logs_contain("LESHAN00000001 .. LESHAN00000003"));
    }

    #[test]
    fn test_factory_failure_aborts_creation() {
        let factory = RecordingFactory::new().with_failure_at(1);
        let result = Launcher::assemble(
            LaunchConfig::default()
                .with_endpoints(3)
                .with_start_window(Duration::from_secs(3)),
            &factory,
            Arc::new(InlineDispatch::new()),
            MetricsRegistry::new(),
        );
        assert!(matches!(
            result,
            Err(LauncherError::Endpoint(EndpointError::Create { .. }))
        ));
        assert!(factory.log().records().is_empty());
    }

    #[test]
    fn test_incompatible_metric_fails_before_start() {
        let registry = MetricsRegistry::new();
        registry
            .gauge("fleetload.endpoint.registration.success")
            .unwrap();
        let factory = RecordingFactory::new();

        let result = Launcher::assemble(
            LaunchConfig::default(),
            &factory,
            Arc::new(InlineDispatch::new()),
            registry,
        );
        match result {
            Err(LauncherError::Configuration(ConfigurationError::IncompatibleMetric {
                name,
                existing,
                requested,
            })) => {
                assert_eq!(name, "fleetload.endpoint.registration.success");
                assert_eq!(existing, MetricKind::Gauge);
                assert_eq!(requested, MetricKind::Counter);
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_closure_factory() {
        let factory = |spec: EndpointSpec,
                       _ctx: EndpointContext|
         -> Result<Arc<dyn SimulatedEndpoint>, EndpointError> {
            Err(EndpointError::InvalidSpec {
                endpoint: spec.id,
                reason: "unsupported".into(),
            })
        };
        let result = Launcher::assemble(
            LaunchConfig::default(),
            &factory,
            Arc::new(InlineDispatch::new()),
            MetricsRegistry::new(),
        );
        assert!(matches!(result, Err(LauncherError::Endpoint(_))));
    }
}
