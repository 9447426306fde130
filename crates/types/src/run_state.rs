//! Run lifecycle state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of one load run.
///
/// States only ever move forward. A run may skip states (a run stopped during
/// the stagger window goes from `Starting` straight to `Stopping`), but never
/// goes back.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RunState {
    /// The fleet exists but nothing has been started.
    #[default]
    Created = 0,
    /// Start calls are being spread over the stagger window.
    Starting = 1,
    /// Every endpoint has received its start call.
    Running = 2,
    /// Stop has been issued to the fleet.
    Stopping = 3,
    /// Every endpoint is destroyed; terminal.
    Destroyed = 4,
}

impl RunState {
    /// Decode from the `repr(u8)` discriminant.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RunState::Created),
            1 => Some(RunState::Starting),
            2 => Some(RunState::Running),
            3 => Some(RunState::Stopping),
            4 => Some(RunState::Destroyed),
            _ => None,
        }
    }

    /// Whether moving from `self` to `next` respects monotonicity.
    pub fn can_advance_to(self, next: RunState) -> bool {
        next > self
    }

    /// Whether the scheduler may still issue start and refresh calls.
    pub fn is_active(self) -> bool {
        matches!(self, RunState::Starting | RunState::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Created => "created",
            RunState::Starting => "starting",
            RunState::Running => "running",
            RunState::Stopping => "stopping",
            RunState::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
