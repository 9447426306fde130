use fleetload_types::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Behaviour of synthetic endpoints.
///
/// Every simulated exchange draws a latency uniformly from
/// `min_latency_ms..=max_latency_ms`, then fails with probability
/// `failure_ratio` or times out with probability `timeout_ratio`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,

    /// Extra latency of a full handshake (secure endpoints).
    pub handshake_ms: u64,

    /// How long an exchange waits before reporting a timeout.
    pub timeout_ms: u64,

    pub failure_ratio: f64,
    pub timeout_ratio: f64,

    /// Base seed. Endpoint `i` uses `seed + i`.
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            min_latency_ms: 5,
            max_latency_ms: 50,
            handshake_ms: 20,
            timeout_ms: 2_000,
            failure_ratio: 0.0,
            timeout_ratio: 0.0,
            seed: 0,
        }
    }
}

impl SyntheticConfig {
    /// Exchanges that complete immediately and always succeed.
    pub fn instant() -> Self {
        Self {
            min_latency_ms: 0,
            max_latency_ms: 0,
            handshake_ms: 0,
            timeout_ms: 0,
            ..Self::default()
        }
    }

    pub fn with_latency(mut self, min: Duration, max: Duration) -> Self {
        self.min_latency_ms = min.as_millis() as u64;
        self.max_latency_ms = max.as_millis() as u64;
        self
    }

    pub fn with_failure_ratio(mut self, ratio: f64) -> Self {
        self.failure_ratio = ratio;
        self
    }

    pub fn with_timeout_ratio(mut self, ratio: f64) -> Self {
        self.timeout_ratio = ratio;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (name, value) in [
            ("failure_ratio", self.failure_ratio),
            ("timeout_ratio", self.timeout_ratio),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigurationError::InvalidRatio { name, value });
            }
        }
        let combined = self.failure_ratio + self.timeout_ratio;
        if combined > 1.0 {
            return Err(ConfigurationError::InvalidRatio {
                name: "failure_ratio + timeout_ratio",
                value: combined,
            });
        }
        if self.min_latency_ms > self.max_latency_ms {
            return Err(ConfigurationError::InvalidLatencyRange {
                min_ms: self.min_latency_ms,
                max_ms: self.max_latency_ms,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(SyntheticConfig::default().validate().is_ok());
        assert!(SyntheticConfig::instant().validate().is_ok());
    }

    #[test]
    fn test_ratio_bounds() {
        let err = SyntheticConfig::default()
            .with_failure_ratio(1.5)
            .validate()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::InvalidRatio {
                name: "failure_ratio",
                value: 1.5
            }
        );

        let err = SyntheticConfig::default()
            .with_failure_ratio(0.6)
            .with_timeout_ratio(0.6)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidRatio { .. }));
    }

    #[test]
    fn test_latency_range() {
        let err = SyntheticConfig::default()
            .with_latency(Duration::from_millis(100), Duration::from_millis(10))
            .validate()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::InvalidLatencyRange {
                min_ms: 100,
                max_ms: 10
            }
        );
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: SyntheticConfig = serde_json::from_str(r#"{"failure_ratio": 0.25}"#).unwrap();
        assert_eq!(config.failure_ratio, 0.25);
        assert_eq!(config.max_latency_ms, 50);
    }
}
