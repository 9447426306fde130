//! Start offsets and the round-robin refresh cursor.

use crate::config::StartSchedule;
use std::time::Duration;

/// Offset of every endpoint's start call from the first one.
///
/// Offsets are absolute, so sleeping until `t0 + offset` never accumulates
/// drift.
pub fn start_offsets(schedule: Option<&StartSchedule>, endpoints: usize) -> Vec<Duration> {
    match schedule {
        Some(StartSchedule::Offsets(offsets)) => offsets.clone(),
        Some(StartSchedule::Window(window)) if endpoints > 1 => {
            let step = window.as_nanos() / (endpoints as u128 - 1);
            (0..endpoints)
                .map(|i| nanos(step * i as u128))
                .collect()
        }
        _ => vec![Duration::ZERO; endpoints],
    }
}

fn nanos(n: u128) -> Duration {
    Duration::from_nanos(u64::try_from(n).unwrap_or(u64::MAX))
}

/// Position of the next refresh candidate.
///
/// Owned by the scheduler timeline; never shared.
#[derive(Debug, Clone)]
pub struct RoundRobinCursor {
    position: usize,
    len: usize,
}

impl RoundRobinCursor {
    pub fn new(len: usize) -> Self {
        Self { position: 0, len }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Offer the refresh to endpoints starting at the cursor, advancing by one
    /// after every attempt, until one accepts or every endpoint was tried
    /// once.
    ///
    /// Returns the index of the endpoint that accepted.
    pub fn sweep(&mut self, mut attempt: impl FnMut(usize) -> bool) -> Option<usize> {
        for _ in 0..self.len {
            let index = self.position;
            self.position = (self.position + 1) % self.len;
            if attempt(index) {
                return Some(index);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_spread_evenly() {
        let offsets = start_offsets(Some(&StartSchedule::Window(Duration::from_secs(40))), 5);
        assert_eq!(
            offsets,
            vec![
                Duration::ZERO,
                Duration::from_secs(10),
                Duration::from_secs(20),
                Duration::from_secs(30),
                Duration::from_secs(40),
            ]
        );
    }

    #[test]
    fn test_single_endpoint_has_no_delay() {
        let offsets = start_offsets(Some(&StartSchedule::Window(Duration::from_secs(40))), 1);
        assert_eq!(offsets, vec![Duration::ZERO]);
        assert_eq!(start_offsets(None, 1), vec![Duration::ZERO]);
    }

    #[test]
    fn test_window_offsets_increase() {
        let offsets = start_offsets(Some(&StartSchedule::Window(Duration::from_millis(999))), 7);
        assert_eq!(offsets.len(), 7);
        assert_eq!(offsets[0], Duration::ZERO);
        assert!(offsets.windows(2).all(|w| w[0] < w[1]));
        // i * (W / (N-1)), not (i * W) / (N-1)
        assert_eq!(offsets[6], Duration::from_nanos(166_500_000 * 6));
    }

    #[test]
    fn test_sweep_stops_at_first_acceptance() {
        let mut cursor = RoundRobinCursor::new(4);
        let mut tried = Vec::new();
        let picked = cursor.sweep(|i| {
            tried.push(i);
            i == 2
        });
        assert_eq!(picked, Some(2));
        assert_eq!(tried, vec![0, 1, 2]);
        assert_eq!(cursor.position(), 3);
    }

    #[test]
    fn test_sweep_wraps_and_is_bounded() {
        let mut cursor = RoundRobinCursor::new(3);
        cursor.sweep(|i| i == 1);
        assert_eq!(cursor.position(), 2);

        let mut attempts = 0;
        assert_eq!(
            cursor.sweep(|_| {
                attempts += 1;
                false
            }),
            None
        );
        assert_eq!(attempts, 3);
        assert_eq!(cursor.position(), 2);
    }

    #[test]
    fn test_fair_when_all_accept() {
        let mut cursor = RoundRobinCursor::new(3);
        let mut hits = [0usize; 3];
        for _ in 0..10 {
            let i = cursor.sweep(|_| true).unwrap();
            hits[i] += 1;
        }
        assert_eq!(hits, [4, 3, 3]);
    }
}
