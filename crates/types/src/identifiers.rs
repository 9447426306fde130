//! Domain-specific identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identity of one simulated endpoint (its registration name).
///
/// Cheap to clone: the name is shared, since the same identity is attached to
/// every outcome event the endpoint reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(Arc<str>);

impl EndpointId {
    /// Create an identity from an endpoint name.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        EndpointId(name.into())
    }

    /// The endpoint name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(name: &str) -> Self {
        EndpointId::new(name)
    }
}

impl From<String> for EndpointId {
    fn from(name: String) -> Self {
        EndpointId::new(name)
    }
}
