//! Lifecycle phases, outcomes and the tagged event endpoints report.

use crate::EndpointId;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle phase of a simulated endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Fetching server configuration from a bootstrap server.
    Bootstrap,
    /// Initial registration with the target server.
    Registration,
    /// Periodic keep-alive of an existing registration.
    #[serde(rename = "update")]
    Refresh,
    /// Graceful removal from the server's registry.
    Deregistration,
}

impl Phase {
    /// All phases, in lifecycle order.
    pub const ALL: [Phase; 4] = [
        Phase::Bootstrap,
        Phase::Registration,
        Phase::Refresh,
        Phase::Deregistration,
    ];

    /// Stable name used in metric names and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Bootstrap => "bootstrap",
            Phase::Registration => "registration",
            Phase::Refresh => "update",
            Phase::Deregistration => "deregistration",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a completed lifecycle action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    /// The server answered with a rejection or the request errored locally.
    Failure,
    /// No response within the endpoint's own timeout.
    Timeout,
}

impl Outcome {
    /// All outcomes.
    pub const ALL: [Outcome; 3] = [Outcome::Success, Outcome::Failure, Outcome::Timeout];

    /// Stable name used in metric names and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Timeout => "timeout",
        }
    }

    /// Whether this outcome should mark the endpoint for diagnosis.
    pub fn is_problem(&self) -> bool {
        !matches!(self, Outcome::Success)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Best-effort description of why a lifecycle action failed.
///
/// A failure either carries a response from the server (code and optional
/// message) or a local error, or both.
#[derive(Debug, Clone, Default)]
pub struct FailureDetail {
    /// Response code returned by the server, if any.
    pub response_code: Option<String>,

    /// Error message returned alongside the response code.
    pub message: Option<String>,

    error: Option<Arc<dyn Error + Send + Sync + 'static>>,
    error_type: Option<&'static str>,
}

impl FailureDetail {
    /// A rejection answered by the server.
    pub fn rejected(response_code: impl Into<String>, message: Option<String>) -> Self {
        Self {
            response_code: Some(response_code.into()),
            message,
            ..Default::default()
        }
    }

    /// A failure caused by a local error.
    pub fn from_error<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            error: Some(Arc::new(error)),
            error_type: Some(std::any::type_name::<E>()),
            ..Default::default()
        }
    }

    /// The underlying error, if the failure was caused by one.
    pub fn error(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        self.error.as_deref()
    }

    /// Extract a one-line message for logs.
    ///
    /// For error-caused failures the wrapped cause's message is preferred,
    /// then the error's own message, then the error's type name. Otherwise
    /// the response code and message are used.
    pub fn summary(&self) -> String {
        if let Some(error) = self.error() {
            if let Some(cause) = error.source() {
                let message = cause.to_string();
                if !message.is_empty() {
                    return message;
                }
            }
            let message = error.to_string();
            if !message.is_empty() {
                return message;
            }
            return self.error_type.unwrap_or("unknown error").to_string();
        }

        match (&self.response_code, &self.message) {
            (Some(code), Some(message)) => format!("{} {}", code, message),
            (Some(code), None) => code.clone(),
            (None, Some(message)) => message.clone(),
            (None, None) => "no detail".to_string(),
        }
    }

    /// Full error chain, outermost first, for trace-level logging.
    pub fn chain(&self) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = self.error().map(|error| error as &(dyn Error + 'static));
        while let Some(error) = current {
            chain.push(error.to_string());
            current = error.source();
        }
        chain
    }
}

/// One completed lifecycle action reported by an endpoint.
#[derive(Debug, Clone)]
pub struct OutcomeEvent {
    /// Endpoint that performed the action.
    pub endpoint: EndpointId,
    /// Lifecycle phase of the action.
    pub phase: Phase,
    /// How the action ended.
    pub outcome: Outcome,
    /// Time from request to outcome, when the endpoint measured it.
    pub latency: Option<Duration>,
    /// Failure detail (only meaningful for [`Outcome::Failure`]).
    pub detail: Option<FailureDetail>,
}

impl OutcomeEvent {
    /// A successful action.
    pub fn success(endpoint: EndpointId, phase: Phase) -> Self {
        Self {
            endpoint,
            phase,
            outcome: Outcome::Success,
            latency: None,
            detail: None,
        }
    }

    /// A failed action.
    pub fn failure(endpoint: EndpointId, phase: Phase, detail: FailureDetail) -> Self {
        Self {
            endpoint,
            phase,
            outcome: Outcome::Failure,
            latency: None,
            detail: Some(detail),
        }
    }

    /// An action that received no response in time.
    pub fn timeout(endpoint: EndpointId, phase: Phase) -> Self {
        Self {
            endpoint,
            phase,
            outcome: Outcome::Timeout,
            latency: None,
            detail: None,
        }
    }

    /// Attach the measured latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}
