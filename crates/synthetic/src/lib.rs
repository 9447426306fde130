//! Synthetic endpoint backend.
//!
//! [`SyntheticEndpoint`] plays the lifecycle of a device without a network:
//! every exchange (bootstrap, registration, update, deregistration) sleeps for
//! a drawn latency on the calling worker thread and reports its outcome.
//! Outcomes are drawn from a ChaCha8 stream seeded per endpoint, so a given
//! seed replays the same run.

mod config;
mod endpoint;

pub use config::SyntheticConfig;
pub use endpoint::{SyntheticEndpoint, SyntheticError, SyntheticFactory};
