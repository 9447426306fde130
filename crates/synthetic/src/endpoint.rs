//! Endpoints whose lifecycle exchanges are simulated in-process.

use crate::SyntheticConfig;
use fleetload_core::{
    EndpointContext, EndpointError, EndpointFactory, EndpointSpec, SimulatedEndpoint,
};
use fleetload_types::{
    ConfigurationError, EndpointId, FailureDetail, Outcome, OutcomeEvent, Phase,
};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Local error reported by a failed synthetic exchange.
#[derive(Debug, Error)]
pub enum SyntheticError {
    #[error("{phase} exchange failed")]
    Transport {
        phase: Phase,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handshake {
    None,
    Abbreviated,
    Full,
}

/// Response code a server would answer a rejected request with.
fn rejection_code(phase: Phase) -> &'static str {
    match phase {
        Phase::Bootstrap => "BAD_REQUEST",
        Phase::Registration => "FORBIDDEN",
        Phase::Refresh | Phase::Deregistration => "NOT_FOUND",
    }
}

struct Inner {
    spec: EndpointSpec,
    config: SyntheticConfig,
    ctx: EndpointContext,
    rng: Mutex<ChaCha8Rng>,
    registered: AtomicBool,
    refreshing: AtomicBool,
    cancel: CancellationToken,
}

impl Inner {
    fn id(&self) -> EndpointId {
        self.spec.id.clone()
    }

    /// Draw latency, outcome and failure flavour for one exchange.
    fn draw(&self) -> (Duration, Outcome, bool) {
        let mut rng = self.rng.lock();
        let latency = Duration::from_millis(
            rng.gen_range(self.config.min_latency_ms..=self.config.max_latency_ms),
        );
        let roll: f64 = rng.gen();
        let outcome = if roll < self.config.failure_ratio {
            Outcome::Failure
        } else if roll < self.config.failure_ratio + self.config.timeout_ratio {
            Outcome::Timeout
        } else {
            Outcome::Success
        };
        (latency, outcome, rng.gen_bool(0.5))
    }

    /// Run one request/response exchange on the calling thread and report it.
    fn exchange(&self, phase: Phase, handshake: Handshake) -> Outcome {
        let (latency, outcome, local_error) = self.draw();
        let handshake_cost = match handshake {
            Handshake::None => Duration::ZERO,
            Handshake::Abbreviated => Duration::from_millis(self.config.handshake_ms / 2),
            Handshake::Full => Duration::from_millis(self.config.handshake_ms),
        };
        let wait = match outcome {
            Outcome::Timeout => Duration::from_millis(self.config.timeout_ms),
            _ => latency + handshake_cost,
        };

        let started = Instant::now();
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
        let elapsed = started.elapsed();

        let event = match outcome {
            Outcome::Success => OutcomeEvent::success(self.id(), phase).with_latency(elapsed),
            Outcome::Failure => {
                let detail = if local_error {
                    FailureDetail::from_error(SyntheticError::Transport {
                        phase,
                        source: std::io::Error::new(
                            std::io::ErrorKind::ConnectionRefused,
                            "connection refused",
                        ),
                    })
                } else {
                    FailureDetail::rejected(rejection_code(phase), None)
                };
                OutcomeEvent::failure(self.id(), phase, detail).with_latency(elapsed)
            }
            Outcome::Timeout => OutcomeEvent::timeout(self.id(), phase),
        };
        self.ctx.observer.on_outcome(&event);
        outcome
    }

    /// Hand one refresh exchange to the pool if a session is active and no
    /// refresh is already in flight.
    fn schedule_refresh(self: &Arc<Self>, force_rehandshake: bool, abbreviated: bool) -> bool {
        if !self.registered.load(Ordering::Acquire) || self.cancel.is_cancelled() {
            return false;
        }
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let handshake = if !self.spec.secure {
            Handshake::None
        } else if force_rehandshake {
            if abbreviated {
                Handshake::Abbreviated
            } else {
                Handshake::Full
            }
        } else if self.spec.reconnect_on_update {
            if self.spec.resume_on_connect {
                Handshake::Abbreviated
            } else {
                Handshake::Full
            }
        } else {
            Handshake::None
        };

        let inner = Arc::clone(self);
        self.ctx.dispatch.spawn(Box::new(move || {
            inner.exchange(Phase::Refresh, handshake);
            inner.refreshing.store(false, Ordering::Release);
        }));
        true
    }
}

/// A simulated device that never touches the network.
pub struct SyntheticEndpoint {
    inner: Arc<Inner>,
    runtime: Option<Handle>,
}

impl SyntheticEndpoint {
    /// Create an endpoint. `runtime` drives self-refreshes when `spec` has
    /// a communication period.
    pub fn new(
        spec: EndpointSpec,
        config: &SyntheticConfig,
        ctx: EndpointContext,
        runtime: Option<Handle>,
    ) -> Self {
        let seed = config.seed.wrapping_add(spec.index as u64);
        Self {
            inner: Arc::new(Inner {
                spec,
                config: config.clone(),
                ctx,
                rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
                registered: AtomicBool::new(false),
                refreshing: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
            runtime,
        }
    }

    pub fn spec(&self) -> &EndpointSpec {
        &self.inner.spec
    }

    /// Whether the endpoint currently holds a registration.
    pub fn is_registered(&self) -> bool {
        self.inner.registered.load(Ordering::Acquire)
    }

    fn spawn_self_refresh(&self, period: Duration) {
        let Some(runtime) = &self.runtime else {
            return;
        };
        if period.is_zero() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = inner.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if !inner.schedule_refresh(false, false) {
                            trace!(endpoint = %inner.spec.id, "Self refresh skipped");
                        }
                    }
                }
            }
        });
    }
}

impl SimulatedEndpoint for SyntheticEndpoint {
    fn id(&self) -> &EndpointId {
        &self.inner.spec.id
    }

    fn start(&self) {
        let inner = &self.inner;
        if inner.cancel.is_cancelled() {
            return;
        }
        let handshake = if inner.spec.secure {
            Handshake::Full
        } else {
            Handshake::None
        };

        if inner.spec.bootstrap && inner.exchange(Phase::Bootstrap, handshake) != Outcome::Success
        {
            debug!(endpoint = %inner.spec.id, "Bootstrap did not succeed, not registering");
            return;
        }
        if inner.exchange(Phase::Registration, handshake) == Outcome::Success {
            inner.registered.store(true, Ordering::Release);
            if let Some(period) = inner.spec.communication_period {
                self.spawn_self_refresh(period);
            }
        }
    }

    fn stop(&self, deregister: bool) {
        self.inner.cancel.cancel();
        let was_registered = self.inner.registered.swap(false, Ordering::AcqRel);
        if deregister && was_registered {
            self.inner.exchange(Phase::Deregistration, Handshake::None);
        }
    }

    fn destroy(&self, _deregister: bool) {
        self.inner.cancel.cancel();
        self.inner.registered.store(false, Ordering::Release);
        trace!(endpoint = %self.inner.spec.id, "Synthetic endpoint destroyed");
    }

    fn trigger_refresh(&self, force_rehandshake: bool, abbreviated: bool) -> bool {
        self.inner.schedule_refresh(force_rehandshake, abbreviated)
    }
}

/// Creates [`SyntheticEndpoint`]s sharing one [`SyntheticConfig`].
#[derive(Debug, Clone)]
pub struct SyntheticFactory {
    config: SyntheticConfig,
    runtime: Option<Handle>,
}

impl SyntheticFactory {
    /// Validate `config`. Self-refreshes run on the current tokio runtime,
    /// if there is one.
    pub fn new(config: SyntheticConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            config,
            runtime: Handle::try_current().ok(),
        })
    }

    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }
}

impl EndpointFactory for SyntheticFactory {
    fn create(
        &self,
        spec: EndpointSpec,
        ctx: EndpointContext,
    ) -> Result<Arc<dyn SimulatedEndpoint>, EndpointError> {
        let has_key = spec.psk_key.as_ref().is_some_and(|key| !key.is_empty());
        if spec.secure && (spec.psk_identity.is_none() || !has_key) {
            return Err(EndpointError::InvalidSpec {
                endpoint: spec.id.clone(),
                reason: "secure endpoint requires a pre-shared key".into(),
            });
        }
        if spec.communication_period.is_some() && self.runtime.is_none() {
            return Err(EndpointError::Create {
                endpoint: spec.id.clone(),
                reason: "self-driven refresh requires a tokio runtime".into(),
            });
        }
        Ok(Arc::new(SyntheticEndpoint::new(
            spec,
            &self.config,
            ctx,
            self.runtime.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetload_core::OutcomeObserver;
    use fleetload_dispatch::InlineDispatch;

    #[derive(Default)]
    struct Collect(Mutex<Vec<OutcomeEvent>>);

    impl Collect {
        fn phases(&self) -> Vec<(Phase, Outcome)> {
            self.0.lock().iter().map(|e| (e.phase, e.outcome)).collect()
        }
    }

    impl OutcomeObserver for Collect {
        fn on_outcome(&self, event: &OutcomeEvent) {
            self.0.lock().push(event.clone());
        }
    }

    fn endpoint(spec: EndpointSpec, config: SyntheticConfig) -> (SyntheticEndpoint, Arc<Collect>) {
        let observer = Arc::new(Collect::default());
        let ctx = EndpointContext::new(observer.clone(), Arc::new(InlineDispatch::new()));
        let runtime = Handle::try_current().ok();
        (SyntheticEndpoint::new(spec, &config, ctx, runtime), observer)
    }

    fn plain_spec() -> EndpointSpec {
        EndpointSpec::new(0, "dev-0", "coap://localhost:5683")
    }

    #[test]
    fn test_start_bootstraps_then_registers() {
        let spec = plain_spec().with_bootstrap(true);
        let (ep, observer) = endpoint(spec, SyntheticConfig::instant());

        ep.start();
        assert!(ep.is_registered());
        assert_eq!(
            observer.phases(),
            vec![
                (Phase::Bootstrap, Outcome::Success),
                (Phase::Registration, Outcome::Success)
            ]
        );
    }

    #[test]
    fn test_refresh_requires_registration() {
        let (ep, observer) = endpoint(plain_spec(), SyntheticConfig::instant());

        assert!(!ep.trigger_refresh(false, false));
        ep.start();
        assert!(ep.trigger_refresh(true, true));
        assert_eq!(
            observer.phases().last(),
            Some(&(Phase::Refresh, Outcome::Success))
        );
    }

    #[test]
    fn test_stop_deregisters_only_when_asked() {
        let (ep, observer) = endpoint(plain_spec(), SyntheticConfig::instant());
        ep.start();
        ep.stop(true);
        assert!(!ep.is_registered());
        assert!(!ep.trigger_refresh(false, false));
        assert_eq!(
            observer.phases().last(),
            Some(&(Phase::Deregistration, Outcome::Success))
        );

        let (ep, observer) = endpoint(plain_spec(), SyntheticConfig::instant());
        ep.start();
        ep.stop(false);
        ep.destroy(false);
        assert_eq!(observer.phases().len(), 1);
    }

    #[test]
    fn test_failed_registration_leaves_no_session() {
        let config = SyntheticConfig::instant().with_failure_ratio(1.0);
        let (ep, observer) = endpoint(plain_spec(), config);

        ep.start();
        assert!(!ep.is_registered());
        assert!(!ep.trigger_refresh(false, false));

        let events = observer.0.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].outcome, Outcome::Failure);
        assert!(events[0].detail.is_some());
    }

    #[test]
    fn test_timeouts_are_reported() {
        let config = SyntheticConfig::instant().with_timeout_ratio(1.0);
        let (ep, observer) = endpoint(plain_spec().with_bootstrap(true), config);

        ep.start();
        assert_eq!(observer.phases(), vec![(Phase::Bootstrap, Outcome::Timeout)]);
        assert!(observer.0.lock()[0].latency.is_none());
    }

    #[test]
    fn test_same_seed_same_outcomes() {
        let config = SyntheticConfig::instant()
            .with_failure_ratio(0.4)
            .with_timeout_ratio(0.2)
            .with_seed(42);
        let run = || {
            let (ep, observer) = endpoint(plain_spec(), config.clone());
            for _ in 0..16 {
                ep.start();
                ep.inner.registered.store(true, Ordering::Release);
                ep.trigger_refresh(false, false);
            }
            observer.phases()
        };
        assert_eq!(run(), run());
    }

    #[tokio::test(start_paused = true)]
    async fn test_self_refresh_until_stopped() {
        let spec = plain_spec().with_communication_period(Some(Duration::from_secs(10)));
        let (ep, observer) = endpoint(spec, SyntheticConfig::instant());

        ep.start();
        tokio::time::sleep(Duration::from_secs(35)).await;
        let refreshes = |o: &Collect| {
            o.phases()
                .iter()
                .filter(|(phase, _)| *phase == Phase::Refresh)
                .count()
        };
        assert_eq!(refreshes(&observer), 3);

        ep.stop(false);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(refreshes(&observer), 3);
    }

    #[test]
    fn test_factory_rejects_secure_spec_without_key() {
        let factory = SyntheticFactory::new(SyntheticConfig::instant()).unwrap();
        let ctx = EndpointContext::new(
            Arc::new(Collect::default()),
            Arc::new(InlineDispatch::new()),
        );

        let spec = EndpointSpec::new(0, "dev-0", "coaps://localhost:5684");
        assert!(matches!(
            factory.create(spec.clone(), ctx.clone()),
            Err(EndpointError::InvalidSpec { .. })
        ));

        let spec = spec.with_psk("dev-0", vec![0x12, 0x34]);
        assert!(factory.create(spec, ctx).is_ok());
    }

    #[test]
    fn test_factory_without_runtime_rejects_self_refresh() {
        let factory = SyntheticFactory::new(SyntheticConfig::instant()).unwrap();
        let ctx = EndpointContext::new(
            Arc::new(Collect::default()),
            Arc::new(InlineDispatch::new()),
        );
        let spec = plain_spec().with_communication_period(Some(Duration::from_secs(60)));
        assert!(matches!(
            factory.create(spec, ctx),
            Err(EndpointError::Create { .. })
        ));
    }
}
