use fleetload_types::RunState;
use std::sync::atomic::{AtomicU8, Ordering};

/// Atomically shared [`RunState`] that only moves forward.
#[derive(Debug, Default)]
pub struct RunStateCell(AtomicU8);

impl RunStateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> RunState {
        RunState::from_u8(self.0.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// Move to `next` if it is ahead of the current state.
    ///
    /// Returns `false` (and changes nothing) otherwise.
    pub fn advance(&self, next: RunState) -> bool {
        let result = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let current = RunState::from_u8(current).unwrap_or_default();
                current.can_advance_to(next).then_some(next as u8)
            });
        if let Ok(previous) = result {
            tracing::debug!(
                from = %RunState::from_u8(previous).unwrap_or_default(),
                to = %next,
                "Run state changed"
            );
        }
        result.is_ok()
    }
}
