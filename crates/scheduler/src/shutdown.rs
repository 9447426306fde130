//! Fleet shutdown: parallel stop, then destroy once each stop has completed.

use fleetload_core::{Fleet, FleetMember};
use fleetload_dispatch::Dispatch;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// Stop calls in flight for a whole fleet.
///
/// Created by [`ShutdownTracker::stop_fleet`], which dispatches every stop to
/// the pool and returns immediately. [`ShutdownTracker::destroy_fleet`] then
/// destroys each endpoint as soon as its own stop call has returned.
#[derive(Debug)]
pub struct ShutdownTracker {
    deregister: bool,
    pending: Vec<(Arc<FleetMember>, oneshot::Receiver<()>)>,
}

impl ShutdownTracker {
    /// Dispatch `stop(deregister)` for every endpoint of the fleet.
    pub fn stop_fleet(fleet: &Fleet, dispatch: &dyn Dispatch, deregister: bool) -> Self {
        let pending = fleet
            .iter()
            .map(|member| {
                let (done_tx, done_rx) = oneshot::channel();
                let job_member = Arc::clone(member);
                dispatch.spawn(Box::new(move || {
                    job_member.stop(deregister);
                    let _ = done_tx.send(());
                }));
                (Arc::clone(member), done_rx)
            })
            .collect();
        Self {
            deregister,
            pending,
        }
    }

    /// Whether endpoints were asked to deregister.
    pub fn deregister(&self) -> bool {
        self.deregister
    }

    /// Number of stop calls issued.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Wait for every stop call, destroying each endpoint right after its own
    /// stop returned. Returns the number of destroy calls that completed.
    pub async fn destroy_fleet(self, dispatch: &dyn Dispatch) -> usize {
        let deregister = self.deregister;
        let endpoints = self.pending.len();

        let destroys = self.pending.into_iter().map(|(member, stopped)| async move {
            if stopped.await.is_err() {
                warn!(endpoint = %member.id(), "Stop call did not complete, destroying anyway");
            }
            let (done_tx, done_rx) = oneshot::channel();
            let job_member = Arc::clone(&member);
            dispatch.spawn(Box::new(move || {
                job_member.destroy(deregister);
                let _ = done_tx.send(());
            }));
            match done_rx.await {
                Ok(()) => true,
                Err(_) => {
                    warn!(endpoint = %member.id(), "Destroy call did not complete");
                    false
                }
            }
        });

        let destroyed = join_all(destroys).await.into_iter().filter(|ok| *ok).count();
        info!(endpoints, destroyed, "Fleet destroyed");
        destroyed
    }
}
