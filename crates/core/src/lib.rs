//! Core abstractions for fleetload.
//!
//! The orchestration engine never speaks the device protocol itself. It drives
//! endpoints through the [`SimulatedEndpoint`] capability and learns how their
//! lifecycle actions went through [`OutcomeObserver`]:
//!
//! ```text
//!   EndpointFactory ──create(spec, ctx)──► SimulatedEndpoint
//!                                              │
//!        scheduler ──start/stop/destroy/──────►│
//!                    trigger_refresh           │
//!                                              ▼
//!                                  OutcomeObserver::on_outcome
//! ```
//!
//! A [`Fleet`] wraps the created endpoints so that each one receives `stop`
//! and `destroy` at most once, whatever the order of shutdown requests.

mod endpoint;
mod fleet;

pub use endpoint::{
    EndpointContext, EndpointError, EndpointFactory, EndpointSpec, OutcomeObserver,
    SimulatedEndpoint,
};
pub use fleet::{Fleet, FleetMember};
