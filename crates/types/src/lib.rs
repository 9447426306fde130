//! Core types for fleetload.
//!
//! These types are shared by every other crate in the workspace:
//!
//! - **Identity**: [`EndpointId`] names one simulated device
//! - **Outcomes**: [`Phase`] x [`Outcome`] classifies every completed lifecycle
//!   action, delivered as a single tagged [`OutcomeEvent`]
//! - **Run lifecycle**: [`RunState`] is the monotonic state of one run
//! - **Errors**: [`ConfigurationError`] covers everything that must fail before
//!   the first endpoint is started

mod error;
mod identifiers;
mod outcome;
mod run_state;

pub use error::{ConfigurationError, MetricKind};
pub use identifiers::EndpointId;
pub use outcome::{FailureDetail, Outcome, OutcomeEvent, Phase};
pub use run_state::RunState;
