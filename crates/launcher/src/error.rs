use crate::config::ConfigFileError;
use fleetload_core::EndpointError;
use fleetload_dispatch::DispatchError;
use fleetload_types::{ConfigurationError, RunState};
use thiserror::Error;

/// Errors surfaced by [`crate::Launcher`].
#[derive(Debug, Error)]
pub enum LauncherError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    ConfigFile(#[from] ConfigFileError),

    /// The endpoint factory failed to create an endpoint.
    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    #[error("Cannot {operation} while the run is {state}")]
    InvalidState {
        operation: &'static str,
        state: RunState,
    },

    /// The worker pool could not be built.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}
