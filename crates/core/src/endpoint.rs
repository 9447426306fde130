//! The endpoint capability and how endpoints are created.

use fleetload_dispatch::Dispatch;
use fleetload_types::{EndpointId, OutcomeEvent};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// One simulated device.
///
/// The scheduler calls `start`, `stop` and `destroy` from worker pool threads;
/// they may block for as long as the protocol exchange takes.
///
/// `trigger_refresh` is called from the scheduler timeline and must not
/// block: it only decides whether the endpoint currently holds a session and,
/// if so, hands the refresh exchange to the pool it received through
/// [`EndpointContext`].
pub trait SimulatedEndpoint: Send + Sync + 'static {
    /// Registration name of the endpoint.
    fn id(&self) -> &EndpointId;

    /// Begin the lifecycle (bootstrap if configured, then registration).
    fn start(&self);

    /// Leave gracefully, deregistering first when `deregister` is set.
    fn stop(&self, deregister: bool);

    /// Release every local resource. Always called after `stop`.
    fn destroy(&self, deregister: bool);

    /// Ask for one refresh of the registration.
    ///
    /// Returns `false` when the endpoint has no active session and nothing
    /// was scheduled.
    fn trigger_refresh(&self, force_rehandshake: bool, abbreviated: bool) -> bool;
}

/// Sink for the outcome of every completed lifecycle action.
///
/// Called concurrently from many worker threads.
pub trait OutcomeObserver: Send + Sync + 'static {
    fn on_outcome(&self, event: &OutcomeEvent);
}

/// Shared services handed to every endpoint at creation.
#[derive(Clone)]
pub struct EndpointContext {
    /// Where outcome events go.
    pub observer: Arc<dyn OutcomeObserver>,

    /// Pool for I/O the endpoint performs on its own (refreshes).
    pub dispatch: Arc<dyn Dispatch>,
}

impl EndpointContext {
    pub fn new(observer: Arc<dyn OutcomeObserver>, dispatch: Arc<dyn Dispatch>) -> Self {
        Self { observer, dispatch }
    }
}

impl fmt::Debug for EndpointContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointContext")
            .field("workers", &self.dispatch.workers())
            .finish_non_exhaustive()
    }
}

/// Identity and launch parameters of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSpec {
    /// Position in the fleet (0-based).
    pub index: usize,

    pub id: EndpointId,

    /// URI of the target server.
    pub server_uri: String,

    /// Whether the server URI asks for a secured transport.
    pub secure: bool,

    /// Whether the endpoint bootstraps before registering.
    pub bootstrap: bool,

    /// Pre-shared key identity (secure endpoints only).
    pub psk_identity: Option<String>,

    /// Pre-shared key bytes (secure endpoints only).
    pub psk_key: Option<Vec<u8>>,

    /// Additional registration attributes.
    pub attributes: BTreeMap<String, String>,

    /// Registration lifetime announced to the server.
    pub lifetime: Duration,

    /// Period of self-driven refreshes. `None` when the scheduler drives
    /// refreshes or refreshes are disabled.
    pub communication_period: Option<Duration>,

    /// Reconnect (new handshake) on every refresh.
    pub reconnect_on_update: bool,

    /// Try to resume the previous session when (re)connecting.
    pub resume_on_connect: bool,
}

impl EndpointSpec {
    /// Default registration lifetime.
    pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(300);

    pub fn new(index: usize, id: impl Into<EndpointId>, server_uri: impl Into<String>) -> Self {
        let server_uri = server_uri.into();
        Self {
            index,
            id: id.into(),
            secure: server_uri.starts_with("coaps"),
            server_uri,
            bootstrap: false,
            psk_identity: None,
            psk_key: None,
            attributes: BTreeMap::new(),
            lifetime: Self::DEFAULT_LIFETIME,
            communication_period: None,
            reconnect_on_update: false,
            resume_on_connect: true,
        }
    }

    pub fn with_bootstrap(mut self, bootstrap: bool) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    /// Set the pre-shared key credentials.
    pub fn with_psk(mut self, identity: impl Into<String>, key: Vec<u8>) -> Self {
        self.psk_identity = Some(identity.into());
        self.psk_key = Some(key);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn with_communication_period(mut self, period: Option<Duration>) -> Self {
        self.communication_period = period;
        self
    }

    pub fn with_reconnect_on_update(mut self, reconnect: bool) -> Self {
        self.reconnect_on_update = reconnect;
        self
    }

    pub fn with_resume_on_connect(mut self, resume: bool) -> Self {
        self.resume_on_connect = resume;
        self
    }
}

/// Errors raised while creating endpoints.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("Failed to create endpoint {endpoint}: {reason}")]
    Create { endpoint: EndpointId, reason: String },

    #[error("Invalid endpoint spec for {endpoint}: {reason}")]
    InvalidSpec { endpoint: EndpointId, reason: String },
}

/// Creates the endpoints of a fleet.
pub trait EndpointFactory: Send + Sync {
    fn create(
        &self,
        spec: EndpointSpec,
        ctx: EndpointContext,
    ) -> Result<Arc<dyn SimulatedEndpoint>, EndpointError>;
}

impl<F> EndpointFactory for F
where
    F: Fn(EndpointSpec, EndpointContext) -> Result<Arc<dyn SimulatedEndpoint>, EndpointError>
        + Send
        + Sync,
{
    fn create(
        &self,
        spec: EndpointSpec,
        ctx: EndpointContext,
    ) -> Result<Arc<dyn SimulatedEndpoint>, EndpointError> {
        self(spec, ctx)
    }
}
