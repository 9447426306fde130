//! Run timeline for fleetload.
//!
//! A [`Scheduler`] binds a validated [`ScheduleConfig`] to a fleet and, once
//! spawned, drives the whole run from a single tokio task:
//!
//! - staggered `start` calls, endpoint `i` at `i * W / (N - 1)`
//! - in [`RefreshMode::GlobalRate`], one refresh tick every `60 s / R`, each
//!   offered round-robin to at most N endpoints
//! - at the end of the run (duration elapsed or [`SchedulerHandle::stop`]),
//!   `stop` dispatched to every endpoint in parallel
//!
//! The [`ShutdownTracker`] returned by [`SchedulerHandle::join`] then destroys
//! every endpoint once its stop call has returned.

mod config;
mod shutdown;
mod stagger;
mod state;
mod timeline;

pub use config::{
    RefreshMode, RehandshakePolicy, ScheduleConfig, StartSchedule, MAX_REFRESH_RATE_PER_MINUTE,
};
pub use shutdown::ShutdownTracker;
pub use stagger::{start_offsets, RoundRobinCursor};
pub use state::RunStateCell;
pub use timeline::{Scheduler, SchedulerHandle};
