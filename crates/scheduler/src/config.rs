//! Run parameters.

use fleetload_types::ConfigurationError;
use std::time::Duration;

/// Highest accepted global refresh rate (one refresh per millisecond).
pub const MAX_REFRESH_RATE_PER_MINUTE: u32 = 60_000;

/// How start calls are spread over time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartSchedule {
    /// Spread evenly: endpoint `i` starts at `i * W / (N - 1)`.
    Window(Duration),
    /// Explicit offset from the first start call, one per endpoint.
    Offsets(Vec<Duration>),
}

/// How endpoints are made to refresh their registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshMode {
    /// No refreshes beyond what endpoints decide on their own.
    #[default]
    Disabled,
    /// The scheduler triggers `per_minute` refreshes across the fleet, one
    /// endpoint at a time.
    GlobalRate { per_minute: u32 },
    /// Every endpoint refreshes itself with this period.
    PerEndpointPeriod(Duration),
}

/// Which handshake a scheduler-triggered refresh performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RehandshakePolicy {
    /// Reuse the current session.
    #[default]
    None,
    /// Force a full handshake.
    Full,
    /// Force an abbreviated (resumed) handshake.
    Abbreviated,
}

impl RehandshakePolicy {
    /// `(force_rehandshake, abbreviated)` as passed to `trigger_refresh`.
    pub fn flags(self) -> (bool, bool) {
        match self {
            RehandshakePolicy::None => (false, false),
            RehandshakePolicy::Full => (true, false),
            RehandshakePolicy::Abbreviated => (true, true),
        }
    }
}

/// Immutable parameters of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// Number of endpoints.
    pub endpoints: usize,

    /// Start spreading. Required when there is more than one endpoint.
    pub start: Option<StartSchedule>,

    pub refresh: RefreshMode,

    /// Run duration. `None` runs until stopped.
    pub duration: Option<Duration>,

    pub rehandshake: RehandshakePolicy,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self::new(1)
    }
}

impl ScheduleConfig {
    pub fn new(endpoints: usize) -> Self {
        Self {
            endpoints,
            start: None,
            refresh: RefreshMode::Disabled,
            duration: None,
            rehandshake: RehandshakePolicy::None,
        }
    }

    /// Spread start calls evenly over `window`.
    pub fn with_start_window(mut self, window: Duration) -> Self {
        self.start = Some(StartSchedule::Window(window));
        self
    }

    /// Use explicit start offsets.
    pub fn with_start_offsets(mut self, offsets: Vec<Duration>) -> Self {
        self.start = Some(StartSchedule::Offsets(offsets));
        self
    }

    pub fn with_refresh(mut self, refresh: RefreshMode) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn with_duration(mut self, duration: Option<Duration>) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_rehandshake(mut self, policy: RehandshakePolicy) -> Self {
        self.rehandshake = policy;
        self
    }

    /// Interval between scheduler refresh ticks, in global rate mode.
    pub fn refresh_interval(&self) -> Option<Duration> {
        match self.refresh {
            RefreshMode::GlobalRate { per_minute } if per_minute > 0 => {
                Some(Duration::from_secs(60) / per_minute)
            }
            _ => None,
        }
    }

    /// Period of self-driven refreshes, in per-endpoint mode.
    pub fn communication_period(&self) -> Option<Duration> {
        match self.refresh {
            RefreshMode::PerEndpointPeriod(period) => Some(period),
            _ => None,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.endpoints == 0 {
            return Err(ConfigurationError::EmptyFleet);
        }

        match &self.start {
            None if self.endpoints > 1 => {
                return Err(ConfigurationError::MissingStaggerWindow {
                    endpoints: self.endpoints,
                });
            }
            Some(StartSchedule::Offsets(offsets)) => {
                if offsets.len() != self.endpoints {
                    return Err(ConfigurationError::InvalidStartOffsets(format!(
                        "expected {} offsets, got {}",
                        self.endpoints,
                        offsets.len()
                    )));
                }
                if let Some(i) = offsets.windows(2).position(|w| w[1] < w[0]) {
                    return Err(ConfigurationError::InvalidStartOffsets(format!(
                        "offset {} ({:?}) is earlier than offset {} ({:?})",
                        i + 1,
                        offsets[i + 1],
                        i,
                        offsets[i]
                    )));
                }
            }
            _ => {}
        }

        match self.refresh {
            RefreshMode::GlobalRate { per_minute }
                if per_minute == 0 || per_minute > MAX_REFRESH_RATE_PER_MINUTE =>
            {
                Err(ConfigurationError::InvalidRefreshRate(per_minute))
            }
            RefreshMode::PerEndpointPeriod(period) if period.is_zero() => {
                Err(ConfigurationError::InvalidRefreshPeriod)
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_interval_from_rate() {
        let config = ScheduleConfig::new(1).with_refresh(RefreshMode::GlobalRate { per_minute: 60 });
        assert_eq!(config.refresh_interval(), Some(Duration::from_secs(1)));

        let config =
            ScheduleConfig::new(1).with_refresh(RefreshMode::GlobalRate { per_minute: 60_000 });
        assert_eq!(config.refresh_interval(), Some(Duration::from_millis(1)));

        let config = ScheduleConfig::new(1)
            .with_refresh(RefreshMode::PerEndpointPeriod(Duration::from_secs(60)));
        assert_eq!(config.refresh_interval(), None);
        assert_eq!(config.communication_period(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_rate_bounds() {
        for rate in [0, 60_001] {
            let config =
                ScheduleConfig::new(1).with_refresh(RefreshMode::GlobalRate { per_minute: rate });
            assert_eq!(
                config.validate(),
                Err(ConfigurationError::InvalidRefreshRate(rate))
            );
        }
        let config = ScheduleConfig::new(1).with_refresh(RefreshMode::GlobalRate { per_minute: 1 });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_stagger_window() {
        assert!(ScheduleConfig::new(1).validate().is_ok());
        assert_eq!(
            ScheduleConfig::new(2).validate(),
            Err(ConfigurationError::MissingStaggerWindow { endpoints: 2 })
        );
        assert!(ScheduleConfig::new(2)
            .with_start_window(Duration::ZERO)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_offsets_validation() {
        let config = ScheduleConfig::new(3).with_start_offsets(vec![Duration::ZERO; 2]);
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidStartOffsets(_))
        ));

        let config = ScheduleConfig::new(3).with_start_offsets(vec![
            Duration::from_secs(1),
            Duration::from_secs(3),
            Duration::from_secs(2),
        ]);
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidStartOffsets(_))
        ));

        let config = ScheduleConfig::new(3).with_start_offsets(vec![
            Duration::from_secs(5),
            Duration::from_secs(5),
            Duration::from_secs(6),
        ]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_period_and_empty_fleet() {
        let config = ScheduleConfig::new(1).with_refresh(RefreshMode::PerEndpointPeriod(Duration::ZERO));
        assert_eq!(config.validate(), Err(ConfigurationError::InvalidRefreshPeriod));
        assert_eq!(
            ScheduleConfig::new(0).validate(),
            Err(ConfigurationError::EmptyFleet)
        );
    }

    #[test]
    fn test_rehandshake_flags() {
        assert_eq!(RehandshakePolicy::None.flags(), (false, false));
        assert_eq!(RehandshakePolicy::Full.flags(), (true, false));
        assert_eq!(RehandshakePolicy::Abbreviated.flags(), (true, true));
    }
}
