//! Test helpers for fleetload.
//!
//! [`RecordingEndpoint`] logs every capability call together with the tokio
//! clock reading at the time of the call. Under
//! `#[tokio::test(start_paused = true)]` those readings are exact, which makes
//! stagger offsets and tick grids directly assertable.
//!
//! ```ignore
//! let (fleet, log, _endpoints) = recording_fleet(5);
//! // ... drive the fleet ...
//! assert_eq!(log.starts().len(), 5);
//! ```

use fleetload_core::{
    EndpointContext, EndpointError, EndpointFactory, EndpointSpec, Fleet, SimulatedEndpoint,
};
use fleetload_types::{EndpointId, OutcomeEvent, Phase};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

/// One capability call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Start,
    Stop { deregister: bool },
    Destroy { deregister: bool },
    TriggerRefresh {
        force_rehandshake: bool,
        abbreviated: bool,
        accepted: bool,
    },
}

#[derive(Debug, Clone)]
pub struct CallRecord {
    pub index: usize,
    pub endpoint: EndpointId,
    pub call: Call,
    pub at: Instant,
}

/// Shared, ordered log of calls across a fleet.
#[derive(Debug, Default)]
pub struct CallLog {
    records: Mutex<Vec<CallRecord>>,
}

impl CallLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, index: usize, endpoint: &EndpointId, call: Call) {
        self.records.lock().push(CallRecord {
            index,
            endpoint: endpoint.clone(),
            call,
            at: Instant::now(),
        });
    }

    /// Every call, in the order the calls were made.
    pub fn records(&self) -> Vec<CallRecord> {
        self.records.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&CallRecord) -> bool) -> usize {
        self.records.lock().iter().filter(|r| predicate(r)).count()
    }

    /// Start calls as `(index, time)`, in call order.
    pub fn starts(&self) -> Vec<(usize, Instant)> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.call == Call::Start)
            .map(|r| (r.index, r.at))
            .collect()
    }

    /// Calls received by one endpoint, in order.
    pub fn calls_for(&self, index: usize) -> Vec<Call> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.index == index)
            .map(|r| r.call)
            .collect()
    }

    /// Every `trigger_refresh` call.
    pub fn refresh_attempts(&self) -> Vec<CallRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| matches!(r.call, Call::TriggerRefresh { .. }))
            .cloned()
            .collect()
    }

    /// Indices of endpoints whose `trigger_refresh` returned `true`, in order.
    pub fn accepted_refreshes(&self) -> Vec<usize> {
        self.records
            .lock()
            .iter()
            .filter(|r| matches!(r.call, Call::TriggerRefresh { accepted: true, .. }))
            .map(|r| r.index)
            .collect()
    }
}

/// Endpoint double that records its calls.
///
/// It holds a session between `start` and `stop`, and accepts refreshes while
/// it holds one unless told to refuse them. With a context it also reports
/// successful registration, update and deregistration outcomes; updates are
/// reported from a job handed to the context's pool.
pub struct RecordingEndpoint {
    index: usize,
    id: EndpointId,
    log: Arc<CallLog>,
    ctx: Option<EndpointContext>,
    session: AtomicBool,
    refuse_refresh: AtomicBool,
}

impl RecordingEndpoint {
    pub fn new(
        index: usize,
        id: impl Into<EndpointId>,
        log: Arc<CallLog>,
        ctx: Option<EndpointContext>,
    ) -> Self {
        Self {
            index,
            id: id.into(),
            log,
            ctx,
            session: AtomicBool::new(false),
            refuse_refresh: AtomicBool::new(false),
        }
    }

    /// Make `trigger_refresh` return `false` even with a session.
    pub fn set_refuse_refresh(&self, refuse: bool) {
        self.refuse_refresh.store(refuse, Ordering::SeqCst);
    }

    pub fn has_session(&self) -> bool {
        self.session.load(Ordering::SeqCst)
    }

    fn report(&self, event: OutcomeEvent) {
        if let Some(ctx) = &self.ctx {
            ctx.observer.on_outcome(&event);
        }
    }
}

impl SimulatedEndpoint for RecordingEndpoint {
    fn id(&self) -> &EndpointId {
        &self.id
    }

    fn start(&self) {
        self.log.push(self.index, &self.id, Call::Start);
        self.session.store(true, Ordering::SeqCst);
        self.report(OutcomeEvent::success(self.id.clone(), Phase::Registration));
    }

    fn stop(&self, deregister: bool) {
        self.log.push(self.index, &self.id, Call::Stop { deregister });
        let had_session = self.session.swap(false, Ordering::SeqCst);
        if had_session && deregister {
            self.report(OutcomeEvent::success(self.id.clone(), Phase::Deregistration));
        }
    }

    fn destroy(&self, deregister: bool) {
        self.log.push(self.index, &self.id, Call::Destroy { deregister });
    }

    fn trigger_refresh(&self, force_rehandshake: bool, abbreviated: bool) -> bool {
        let accepted = self.has_session() && !self.refuse_refresh.load(Ordering::SeqCst);
        self.log.push(
            self.index,
            &self.id,
            Call::TriggerRefresh {
                force_rehandshake,
                abbreviated,
                accepted,
            },
        );
        if accepted {
            if let Some(ctx) = &self.ctx {
                let observer = Arc::clone(&ctx.observer);
                let event = OutcomeEvent::success(self.id.clone(), Phase::Refresh);
                ctx.dispatch
                    .spawn(Box::new(move || observer.on_outcome(&event)));
            }
        }
        accepted
    }
}

/// A fleet of `n` context-free recording endpoints named `ep-<index>`.
pub fn recording_fleet(n: usize) -> (Fleet, Arc<CallLog>, Vec<Arc<RecordingEndpoint>>) {
    let log = CallLog::new();
    let endpoints: Vec<Arc<RecordingEndpoint>> = (0..n)
        .map(|i| {
            Arc::new(RecordingEndpoint::new(
                i,
                format!("ep-{}", i),
                Arc::clone(&log),
                None,
            ))
        })
        .collect();
    let members = endpoints
        .iter()
        .map(|e| Arc::clone(e) as Arc<dyn SimulatedEndpoint>)
        .collect();
    let fleet = Fleet::new(members).expect("recording fleet must not be empty");
    (fleet, log, endpoints)
}

/// Factory creating [`RecordingEndpoint`]s wired to the given context.
#[derive(Default)]
pub struct RecordingFactory {
    log: Arc<CallLog>,
    fail_at: Option<usize>,
    refuse_refresh: bool,
    created: Mutex<Vec<Arc<RecordingEndpoint>>>,
    specs: Mutex<Vec<EndpointSpec>>,
}

impl RecordingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail creation of the endpoint at `index`.
    pub fn with_failure_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Created endpoints refuse every refresh.
    pub fn with_refresh_refused(mut self) -> Self {
        self.refuse_refresh = true;
        self
    }

    pub fn log(&self) -> &Arc<CallLog> {
        &self.log
    }

    pub fn endpoints(&self) -> Vec<Arc<RecordingEndpoint>> {
        self.created.lock().clone()
    }

    /// Specs received by `create`, in call order.
    pub fn specs(&self) -> Vec<EndpointSpec> {
        self.specs.lock().clone()
    }
}

impl EndpointFactory for RecordingFactory {
    fn create(
        &self,
        spec: EndpointSpec,
        ctx: EndpointContext,
    ) -> Result<Arc<dyn SimulatedEndpoint>, EndpointError> {
        if self.fail_at == Some(spec.index) {
            return Err(EndpointError::Create {
                endpoint: spec.id,
                reason: "injected failure".to_string(),
            });
        }

        let endpoint = Arc::new(RecordingEndpoint::new(
            spec.index,
            spec.id.clone(),
            Arc::clone(&self.log),
            Some(ctx),
        ));
        endpoint.set_refuse_refresh(self.refuse_refresh);
        self.created.lock().push(Arc::clone(&endpoint));
        self.specs.lock().push(spec);
        Ok(endpoint)
    }
}
