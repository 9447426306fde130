//! The fleet of endpoints driven by one run.

use crate::SimulatedEndpoint;
use fleetload_types::{ConfigurationError, EndpointId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Delivered {
    start: bool,
    stop: bool,
    destroy: bool,
}

/// One endpoint of a fleet, with lifecycle calls delivered at most once.
///
/// Lifecycle calls on the same member are serialized: a `stop` racing a
/// queued `start` either runs after it or suppresses it.
pub struct FleetMember {
    index: usize,
    endpoint: Arc<dyn SimulatedEndpoint>,
    delivered: Mutex<Delivered>,
    stopped: AtomicBool,
}

impl FleetMember {
    fn new(index: usize, endpoint: Arc<dyn SimulatedEndpoint>) -> Self {
        Self {
            index,
            endpoint,
            delivered: Mutex::new(Delivered::default()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Position in the fleet.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn id(&self) -> &EndpointId {
        self.endpoint.id()
    }

    /// The wrapped endpoint.
    pub fn endpoint(&self) -> &Arc<dyn SimulatedEndpoint> {
        &self.endpoint
    }

    /// Deliver `start`. Returns `false` if already started or stopped.
    pub fn start(&self) -> bool {
        let mut delivered = self.delivered.lock();
        if delivered.start || delivered.stop {
            return false;
        }
        delivered.start = true;
        self.endpoint.start();
        true
    }

    /// Deliver `stop`. Returns `false` if already stopped.
    pub fn stop(&self, deregister: bool) -> bool {
        let mut delivered = self.delivered.lock();
        if delivered.stop {
            return false;
        }
        delivered.stop = true;
        self.stopped.store(true, Ordering::Release);
        self.endpoint.stop(deregister);
        true
    }

    /// Deliver `destroy`. Returns `false` if already destroyed.
    pub fn destroy(&self, deregister: bool) -> bool {
        let mut delivered = self.delivered.lock();
        if delivered.destroy {
            return false;
        }
        if !delivered.stop {
            tracing::warn!(endpoint = %self.id(), "Destroying an endpoint that was never stopped");
        }
        delivered.destroy = true;
        self.endpoint.destroy(deregister);
        true
    }

    /// Forward a refresh request. Never blocks on a lifecycle call.
    pub fn trigger_refresh(&self, force_rehandshake: bool, abbreviated: bool) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }
        self.endpoint.trigger_refresh(force_rehandshake, abbreviated)
    }

    pub fn is_started(&self) -> bool {
        self.delivered.lock().start
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn is_destroyed(&self) -> bool {
        self.delivered.lock().destroy
    }
}

impl std::fmt::Debug for FleetMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetMember")
            .field("index", &self.index)
            .field("id", self.id())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Ordered, immutable set of endpoints.
#[derive(Clone)]
pub struct Fleet {
    members: Arc<[Arc<FleetMember>]>,
}

impl Fleet {
    /// Wrap created endpoints. The fleet must not be empty.
    pub fn new(endpoints: Vec<Arc<dyn SimulatedEndpoint>>) -> Result<Self, ConfigurationError> {
        if endpoints.is_empty() {
            return Err(ConfigurationError::EmptyFleet);
        }
        let members = endpoints
            .into_iter()
            .enumerate()
            .map(|(index, endpoint)| Arc::new(FleetMember::new(index, endpoint)))
            .collect();
        Ok(Self { members })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always `false`: a fleet holds at least one endpoint.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<FleetMember>> {
        self.members.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<FleetMember>> {
        self.members.iter()
    }

    /// Identities of the first and last endpoints.
    pub fn range(&self) -> (&EndpointId, &EndpointId) {
        let first = &self.members[0];
        let last = &self.members[self.members.len() - 1];
        (first.id(), last.id())
    }
}

impl std::fmt::Debug for Fleet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (first, last) = self.range();
        write!(f, "Fleet({} endpoints, {} .. {})", self.len(), first, last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counting {
        id: EndpointId,
        starts: AtomicUsize,
        stops: AtomicUsize,
        destroys: AtomicUsize,
        session: AtomicBool,
    }

    impl Counting {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                id: EndpointId::from(name),
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                destroys: AtomicUsize::new(0),
                session: AtomicBool::new(false),
            })
        }
    }

    impl SimulatedEndpoint for Counting {
        fn id(&self) -> &EndpointId {
            &self.id
        }
        fn start(&self) {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.session.store(true, Ordering::SeqCst);
        }
        fn stop(&self, _deregister: bool) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.session.store(false, Ordering::SeqCst);
        }
        fn destroy(&self, _deregister: bool) {
            self.destroys.fetch_add(1, Ordering::SeqCst);
        }
        fn trigger_refresh(&self, _force: bool, _abbreviated: bool) -> bool {
            self.session.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_empty_fleet_rejected() {
        assert_eq!(
            Fleet::new(Vec::new()).err(),
            Some(ConfigurationError::EmptyFleet)
        );
    }

    #[test]
    fn test_lifecycle_calls_delivered_once() {
        let endpoint = Counting::new("dev-1");
        let fleet = Fleet::new(vec![endpoint.clone() as Arc<dyn SimulatedEndpoint>]).unwrap();
        let member = fleet.get(0).unwrap();

        assert!(member.start());
        assert!(!member.start());
        assert!(member.trigger_refresh(true, false));

        assert!(member.stop(true));
        assert!(!member.stop(false));
        assert!(!member.trigger_refresh(true, false));

        assert!(member.destroy(true));
        assert!(!member.destroy(true));

        assert_eq!(endpoint.starts.load(Ordering::SeqCst), 1);
        assert_eq!(endpoint.stops.load(Ordering::SeqCst), 1);
        assert_eq!(endpoint.destroys.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_start_after_stop_is_suppressed() {
        let endpoint = Counting::new("dev-1");
        let fleet = Fleet::new(vec![endpoint.clone() as Arc<dyn SimulatedEndpoint>]).unwrap();
        let member = fleet.get(0).unwrap();

        assert!(member.stop(false));
        assert!(!member.start());
        assert!(!member.is_started());
        assert_eq!(endpoint.starts.load(Ordering::SeqCst), 0);
        assert_eq!(endpoint.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_range_and_indices() {
        let endpoints: Vec<Arc<dyn SimulatedEndpoint>> = ["a", "b", "c"]
            .iter()
            .map(|name| Counting::new(name) as Arc<dyn SimulatedEndpoint>)
            .collect();
        let fleet = Fleet::new(endpoints).unwrap();

        let (first, last) = fleet.range();
        assert_eq!((first.as_str(), last.as_str()), ("a", "c"));
        assert_eq!(
            fleet.iter().map(|m| m.index()).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(format!("{:?}", fleet), "Fleet(3 endpoints, a .. c)");
    }
}
