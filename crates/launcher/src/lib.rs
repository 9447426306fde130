//! Launcher for fleetload runs.
//!
//! [`LaunchConfig`] describes a run: the target server, how many endpoints
//! and how they are named ([`IndexPattern`]), how their start is spread and
//! how they refresh. [`Launcher`] turns it into a fleet through an
//! [`EndpointFactory`](fleetload_core::EndpointFactory), drives the schedule
//! and renders the final [`Report`](fleetload_metrics::Report).
//!
//! The `fleetload` binary wires the launcher to the synthetic backend.

mod config;
mod error;
mod launcher;
mod pattern;

pub use config::{
    parse_rehandshake, ConfigFileError, FileConfig, GraphiteConfig, GraphiteSection, LaunchConfig,
    DEFAULT_COMMUNICATION_PERIOD, DEFAULT_ENDPOINT_PATTERN, DEFAULT_PSK_KEY_PATTERN,
    START_WINDOW_PER_ENDPOINT,
};
pub use error::LauncherError;
pub use launcher::{Launcher, RunStatus};
pub use pattern::IndexPattern;
