//! Launch configuration: builder, naming and the TOML file layer.

use crate::pattern::{describe_range, IndexPattern};
use fleetload_core::EndpointSpec;
use fleetload_dispatch::WorkerPoolConfig;
use fleetload_metrics::{DEFAULT_GRAPHITE_ADDRESS, DEFAULT_POLLING_PERIOD};
use fleetload_scheduler::{RefreshMode, RehandshakePolicy, ScheduleConfig};
use fleetload_synthetic::SyntheticConfig;
use fleetload_types::ConfigurationError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default endpoint naming pattern.
pub const DEFAULT_ENDPOINT_PATTERN: &str = "LESHAN%08d";

/// Default pre-shared key pattern (hexadecimal once expanded).
pub const DEFAULT_PSK_KEY_PATTERN: &str = "1234567890ABCDEF%08X";

/// Default period of self-driven refreshes.
pub const DEFAULT_COMMUNICATION_PERIOD: Duration = Duration::from_secs(60);

/// Start window per endpoint when none is configured.
pub const START_WINDOW_PER_ENDPOINT: Duration = Duration::from_secs(3);

/// Where and how often to push metrics in Graphite plaintext protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphiteConfig {
    /// `host:port` of the Graphite server.
    pub address: String,
    pub period: Duration,
}

impl Default for GraphiteConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_GRAPHITE_ADDRESS.to_string(),
            period: DEFAULT_POLLING_PERIOD,
        }
    }
}

/// Everything needed to launch one run.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Target server URI. A `coaps` scheme makes every endpoint secure.
    pub server_uri: String,

    pub endpoints: usize,

    /// Window to start every endpoint in. `None` means 3 s per endpoint.
    pub start_window: Option<Duration>,

    /// Global rate and per-endpoint period overwrite each other.
    pub refresh: RefreshMode,

    /// Run duration. `None` runs until stopped.
    pub duration: Option<Duration>,

    pub rehandshake: RehandshakePolicy,

    /// Bootstrap before registering.
    pub bootstrap: bool,
    pub reconnect_on_update: bool,
    pub resume_on_connect: bool,

    pub endpoint_pattern: String,

    /// Defaults to the endpoint pattern.
    pub psk_id_pattern: Option<String>,
    pub psk_key_pattern: String,

    /// Registration attributes; keys and values are index patterns.
    pub attributes: BTreeMap<String, String>,

    /// Worker pool size. `None` sizes the pool for the fleet.
    pub workers: Option<usize>,

    pub graphite: Option<GraphiteConfig>,

    /// Period of metric logging while the run is active.
    pub log_period: Option<Duration>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self::new("coap://localhost:5683")
    }
}

impl LaunchConfig {
    pub fn new(server_uri: impl Into<String>) -> Self {
        Self {
            server_uri: server_uri.into(),
            endpoints: 1,
            start_window: None,
            refresh: RefreshMode::PerEndpointPeriod(DEFAULT_COMMUNICATION_PERIOD),
            duration: None,
            rehandshake: RehandshakePolicy::Abbreviated,
            bootstrap: false,
            reconnect_on_update: false,
            resume_on_connect: true,
            endpoint_pattern: DEFAULT_ENDPOINT_PATTERN.to_string(),
            psk_id_pattern: None,
            psk_key_pattern: DEFAULT_PSK_KEY_PATTERN.to_string(),
            attributes: BTreeMap::new(),
            workers: None,
            graphite: None,
            log_period: None,
        }
    }

    pub fn with_server_uri(mut self, server_uri: impl Into<String>) -> Self {
        self.server_uri = server_uri.into();
        self
    }

    pub fn with_endpoints(mut self, endpoints: usize) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_start_window(mut self, window: Duration) -> Self {
        self.start_window = Some(window);
        self
    }

    /// Let the scheduler trigger `per_minute` refreshes across the fleet.
    /// Replaces any communication period.
    pub fn with_global_rate(mut self, per_minute: u32) -> Self {
        self.refresh = RefreshMode::GlobalRate { per_minute };
        self
    }

    /// Let every endpoint refresh itself every `period`. Replaces any global
    /// rate.
    pub fn with_communication_period(mut self, period: Duration) -> Self {
        self.refresh = RefreshMode::PerEndpointPeriod(period);
        self
    }

    pub fn without_refresh(mut self) -> Self {
        self.refresh = RefreshMode::Disabled;
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

    pub fn with_bootstrap(mut self, bootstrap: bool) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    pub fn with_reconnect_on_update(mut self, reconnect: bool) -> Self {
        self.reconnect_on_update = reconnect;
        self
    }

    pub fn with_resume_on_connect(mut self, resume: bool) -> Self {
        self.resume_on_connect = resume;
        self
    }

    pub fn with_endpoint_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.endpoint_pattern = pattern.into();
        self
    }

    pub fn with_psk_id_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.psk_id_pattern = Some(pattern.into());
        self
    }

    pub fn with_psk_key_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.psk_key_pattern = pattern.into();
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_graphite(mut self, graphite: GraphiteConfig) -> Self {
        self.graphite = Some(graphite);
        self
    }

    pub fn with_log_period(mut self, period: Duration) -> Self {
        self.log_period = Some(period);
        self
    }

    /// Whether endpoints talk to the server over a secured transport.
    pub fn is_secure(&self) -> bool {
        self.server_uri.starts_with("coaps")
    }

    pub fn start_window(&self) -> Duration {
        self.start_window
            .unwrap_or(START_WINDOW_PER_ENDPOINT * self.endpoints as u32)
    }

    /// Registration lifetime: the run duration, but at least the default
    /// lifetime.
    pub fn lifetime(&self) -> Duration {
        self.duration
            .unwrap_or(Duration::ZERO)
            .max(EndpointSpec::DEFAULT_LIFETIME)
    }

    pub fn schedule(&self) -> ScheduleConfig {
        ScheduleConfig::new(self.endpoints)
            .with_start_window(self.start_window())
            .with_refresh(self.refresh)
            .with_duration(self.duration)
            .with_rehandshake(self.rehandshake)
    }

    pub fn worker_pool(&self) -> WorkerPoolConfig {
        self.workers
            .map(WorkerPoolConfig::new)
            .unwrap_or_else(|| WorkerPoolConfig::for_fleet(self.endpoints))
            .with_thread_name("fleetload-endpoint")
    }

    fn patterns(&self) -> Result<Patterns, ConfigurationError> {
        let endpoint = IndexPattern::parse(&self.endpoint_pattern)?;
        let psk_id = match &self.psk_id_pattern {
            Some(pattern) => IndexPattern::parse(pattern)?,
            None => endpoint.clone(),
        };
        let psk_key = IndexPattern::parse(&self.psk_key_pattern)?;
        let attributes = self
            .attributes
            .iter()
            .map(|(key, value)| -> Result<_, ConfigurationError> {
                Ok((IndexPattern::parse(key)?, IndexPattern::parse(value)?))
            })
            .collect::<Result<Vec<_>, ConfigurationError>>()?;
        Ok(Patterns {
            endpoint,
            psk_id,
            psk_key,
            attributes,
        })
    }

    /// Check everything that can be checked before creating endpoints.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.schedule().validate()?;
        self.worker_pool().validate()?;
        let patterns = self.patterns()?;
        if self.is_secure() {
            patterns.psk_key(1)?;
        }
        if self.log_period == Some(Duration::ZERO) {
            return Err(ConfigurationError::InvalidReportPeriod { name: "log_period" });
        }
        if let Some(graphite) = &self.graphite {
            if graphite.period.is_zero() {
                return Err(ConfigurationError::InvalidReportPeriod {
                    name: "graphite.period",
                });
            }
        }
        Ok(())
    }

    /// One spec per endpoint, in fleet order. Names use 1-based indices.
    pub fn endpoint_specs(&self) -> Result<Vec<EndpointSpec>, ConfigurationError> {
        let patterns = self.patterns()?;
        let communication_period = self.schedule().communication_period();
        let lifetime = self.lifetime();

        (0..self.endpoints)
            .map(|position| -> Result<EndpointSpec, ConfigurationError> {
                let index = position as u64 + 1;
                let mut spec =
                    EndpointSpec::new(position, patterns.endpoint.format(index), &self.server_uri)
                        .with_bootstrap(self.bootstrap)
                        .with_lifetime(lifetime)
                        .with_communication_period(communication_period)
                        .with_reconnect_on_update(self.reconnect_on_update)
                        .with_resume_on_connect(self.resume_on_connect);
                for (key, value) in &patterns.attributes {
                    spec = spec.with_attribute(key.format(index), value.format(index));
                }
                if spec.secure {
                    spec = spec.with_psk(patterns.psk_id.format(index), patterns.psk_key(index)?);
                }
                Ok(spec)
            })
            .collect()
    }

    /// Names of the first and last endpoints, with their credentials when
    /// secure.
    pub fn range_description(&self) -> Result<String, ConfigurationError> {
        let patterns = self.patterns()?;
        let describe = |index: u64| {
            let name = patterns.endpoint.format(index);
            if self.is_secure() {
                format!(
                    "{}({}/{})",
                    name,
                    patterns.psk_id.format(index),
                    patterns.psk_key.format(index)
                )
            } else {
                name
            }
        };
        let last = self.endpoints.max(1) as u64;
        Ok(describe_range(&describe(1), &describe(last), self.endpoints))
    }
}

struct Patterns {
    endpoint: IndexPattern,
    psk_id: IndexPattern,
    psk_key: IndexPattern,
    attributes: Vec<(IndexPattern, IndexPattern)>,
}

impl Patterns {
    fn psk_key(&self, index: u64) -> Result<Vec<u8>, ConfigurationError> {
        let key = self.psk_key.format(index);
        hex::decode(&key).map_err(|_| ConfigurationError::InvalidPskKey {
            index: index as usize,
            key,
        })
    }
}

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid duration {value:?} for {field}: {source}")]
    Duration {
        field: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },

    #[error("Invalid value {value:?} for {field}")]
    Value { field: &'static str, value: String },

    #[error("communication_period and updates_per_minute are mutually exclusive")]
    ConflictingRefresh,

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

/// Graphite section of a configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraphiteSection {
    pub address: Option<String>,
    pub period: Option<String>,
}

/// A `fleet.toml` file. Every field is optional; durations are humantime
/// strings such as `"90s"` or `"10m"`.
///
/// ```toml
/// server_uri = "coaps://localhost:5684"
/// endpoints = 1000
/// start_window = "5m"
/// updates_per_minute = 1700
/// duration = "1h"
///
/// [attributes]
/// "serial" = "SN-%06d"
///
/// [graphite]
/// address = "graphite:2003"
///
/// [synthetic]
/// max_latency_ms = 80
/// failure_ratio = 0.01
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub server_uri: Option<String>,
    pub endpoints: Option<usize>,
    pub start_window: Option<String>,
    pub communication_period: Option<String>,
    pub updates_per_minute: Option<u32>,
    pub no_refresh: bool,
    pub duration: Option<String>,
    /// `none`, `full` or `abbreviated`.
    pub rehandshake: Option<String>,
    pub bootstrap: Option<bool>,
    pub reconnect_on_update: Option<bool>,
    pub resume_on_connect: Option<bool>,
    pub endpoint_pattern: Option<String>,
    pub psk_id_pattern: Option<String>,
    pub psk_key_pattern: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub workers: Option<usize>,
    pub log_period: Option<String>,
    pub graphite: Option<GraphiteSection>,
    pub synthetic: Option<SyntheticConfig>,
}

fn parse_duration(field: &'static str, value: &str) -> Result<Duration, ConfigFileError> {
    humantime::parse_duration(value).map_err(|source| ConfigFileError::Duration {
        field,
        value: value.to_string(),
        source,
    })
}

/// Parse a reporter period, which must not be zero.
fn parse_period(field: &'static str, value: &str) -> Result<Duration, ConfigFileError> {
    let period = parse_duration(field, value)?;
    if period.is_zero() {
        return Err(ConfigurationError::InvalidReportPeriod { name: field }.into());
    }
    Ok(period)
}

/// Parse a rehandshake policy name.
pub fn parse_rehandshake(value: &str) -> Option<RehandshakePolicy> {
    match value.to_ascii_lowercase().as_str() {
        "none" => Some(RehandshakePolicy::None),
        "full" => Some(RehandshakePolicy::Full),
        "abbreviated" | "resume" => Some(RehandshakePolicy::Abbreviated),
        _ => None,
    }
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigFileError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigFileError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay the file onto `config`.
    pub fn apply(&self, mut config: LaunchConfig) -> Result<LaunchConfig, ConfigFileError> {
        if let Some(server_uri) = &self.server_uri {
            config.server_uri = server_uri.clone();
        }
        if let Some(endpoints) = self.endpoints {
            config.endpoints = endpoints;
        }
        if let Some(window) = &self.start_window {
            config.start_window = Some(parse_duration("start_window", window)?);
        }
        match (&self.communication_period, self.updates_per_minute) {
            (Some(_), Some(_)) => return Err(ConfigFileError::ConflictingRefresh),
            (Some(period), None) => {
                config = config
                    .with_communication_period(parse_duration("communication_period", period)?)
            }
            (None, Some(rate)) => config = config.with_global_rate(rate),
            (None, None) => {}
        }
        if self.no_refresh {
            config = config.without_refresh();
        }
        if let Some(duration) = &self.duration {
            config.duration = Some(parse_duration("duration", duration)?);
        }
        if let Some(policy) = &self.rehandshake {
            config.rehandshake = parse_rehandshake(policy).ok_or_else(|| ConfigFileError::Value {
                field: "rehandshake",
                value: policy.clone(),
            })?;
        }
        if let Some(bootstrap) = self.bootstrap {
            config.bootstrap = bootstrap;
        }
        if let Some(reconnect) = self.reconnect_on_update {
            config.reconnect_on_update = reconnect;
        }
        if let Some(resume) = self.resume_on_connect {
            config.resume_on_connect = resume;
        }
        if let Some(pattern) = &self.endpoint_pattern {
            config.endpoint_pattern = pattern.clone();
        }
        if let Some(pattern) = &self.psk_id_pattern {
            config.psk_id_pattern = Some(pattern.clone());
        }
        if let Some(pattern) = &self.psk_key_pattern {
            config.psk_key_pattern = pattern.clone();
        }
        config
            .attributes
            .extend(self.attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Some(workers) = self.workers {
            config.workers = Some(workers);
        }
        if let Some(period) = &self.log_period {
            config.log_period = Some(parse_period("log_period", period)?);
        }
        if let Some(section) = &self.graphite {
            let mut graphite = config.graphite.take().unwrap_or_default();
            if let Some(address) = &section.address {
                graphite.address = address.clone();
            }
            if let Some(period) = &section.period {
                graphite.period = parse_period("graphite.period", period)?;
            }
            config.graphite = Some(graphite);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LaunchConfig::new("coap://localhost:5683").with_endpoints(10);
        assert_eq!(config.start_window(), Duration::from_secs(30));
        assert_eq!(config.lifetime(), Duration::from_secs(300));
        assert_eq!(
            config.refresh,
            RefreshMode::PerEndpointPeriod(Duration::from_secs(60))
        );
        assert!(config.validate().is_ok());

        let long = config.with_duration(Some(Duration::from_secs(3600)));
        assert_eq!(long.lifetime(), Duration::from_secs(3600));
    }

    #[test]
    fn test_refresh_settings_are_last_writer_wins() {
        let config = LaunchConfig::default()
            .with_communication_period(Duration::from_secs(30))
            .with_global_rate(1700);
        assert_eq!(config.refresh, RefreshMode::GlobalRate { per_minute: 1700 });
        assert_eq!(config.schedule().communication_period(), None);

        let config = config.with_communication_period(Duration::from_secs(30));
        assert_eq!(
            config.schedule().communication_period(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(config.schedule().refresh_interval(), None);
    }

    #[test]
    fn test_plain_endpoint_specs() {
        let config = LaunchConfig::new("coap://localhost:5683")
            .with_endpoints(3)
            .with_bootstrap(true)
            .with_attribute("serial", "SN-%04d");
        let specs = config.endpoint_specs().unwrap();

        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0].index, 0);
        assert_eq!(specs[0].id.as_str(), "LESHAN00000001");
        assert_eq!(specs[2].id.as_str(), "LESHAN00000003");
        assert!(specs.iter().all(|s| s.bootstrap && !s.secure));
        assert!(specs[0].psk_key.is_none());
        assert_eq!(specs[1].attributes.get("serial").map(String::as_str), Some("SN-0002"));
        assert_eq!(
            specs[0].communication_period,
            Some(DEFAULT_COMMUNICATION_PERIOD)
        );
        assert_eq!(config.range_description().unwrap(), "LESHAN00000001 .. LESHAN00000003");
    }

    #[test]
    fn test_secure_endpoint_specs() {
        let config = LaunchConfig::new("coaps://localhost:5684")
            .with_endpoints(2)
            .with_psk_id_pattern("id-%d");
        let specs = config.endpoint_specs().unwrap();

        assert!(specs[1].secure);
        assert_eq!(specs[1].psk_identity.as_deref(), Some("id-2"));
        assert_eq!(
            specs[1].psk_key.as_deref(),
            Some(&[0x12, 0x34, 0x56, 0x78, 0x90, 0xAB, 0xCD, 0xEF, 0, 0, 0, 2][..])
        );
        assert_eq!(
            config.range_description().unwrap(),
            "LESHAN00000001(id-1/1234567890ABCDEF00000001) .. LESHAN00000002(id-2/1234567890ABCDEF00000002)"
        );
    }

    #[test]
    fn test_non_hex_psk_key_fails_before_start() {
        let config = LaunchConfig::new("coaps://localhost:5684").with_psk_key_pattern("key-%d");
        assert_eq!(
            config.validate(),
            Err(ConfigurationError::InvalidPskKey {
                index: 1,
                key: "key-1".into()
            })
        );

        // Plain endpoints never decode the key.
        let plain = config.with_server_uri("coap://localhost:5683");
        assert!(plain.validate().is_ok());
    }

    #[test]
    fn test_invalid_configuration() {
        let config = LaunchConfig::default().with_endpoint_pattern("dev-%q");
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidPattern { .. })
        ));

        let config = LaunchConfig::default().with_global_rate(0);
        assert_eq!(
            config.validate(),
            Err(ConfigurationError::InvalidRefreshRate(0))
        );

        let config = LaunchConfig::default().with_workers(0);
        assert_eq!(config.validate(), Err(ConfigurationError::InvalidWorkerCount));
    }

    #[test]
    fn test_file_overlay() {
        let file: FileConfig = toml::from_str(
            r#"
            server_uri = "coap://server:5683"
            endpoints = 4
            start_window = "2s"
            updates_per_minute = 120
            duration = "10m"
            rehandshake = "full"

            [attributes]
            "model" = "m%d"

            [graphite]
            period = "10s"

            [synthetic]
            failure_ratio = 0.5
            "#,
        )
        .unwrap();

        let config = file.apply(LaunchConfig::default()).unwrap();
        assert_eq!(config.server_uri, "coap://server:5683");
        assert_eq!(config.endpoints, 4);
        assert_eq!(config.start_window(), Duration::from_secs(2));
        assert_eq!(config.refresh, RefreshMode::GlobalRate { per_minute: 120 });
        assert_eq!(config.duration, Some(Duration::from_secs(600)));
        assert_eq!(config.rehandshake, RehandshakePolicy::Full);
        assert_eq!(config.attributes.get("model").map(String::as_str), Some("m%d"));
        assert_eq!(
            config.graphite,
            Some(GraphiteConfig {
                address: DEFAULT_GRAPHITE_ADDRESS.into(),
                period: Duration::from_secs(10)
            })
        );
        assert_eq!(file.synthetic.map(|s| s.failure_ratio), Some(0.5));
    }

    #[test]
    fn test_file_rejects_conflicts_and_bad_durations() {
        let file: FileConfig = toml::from_str(
            r#"
            communication_period = "30s"
            updates_per_minute = 60
            "#,
        )
        .unwrap();
        assert!(matches!(
            file.apply(LaunchConfig::default()),
            Err(ConfigFileError::ConflictingRefresh)
        ));

        let file: FileConfig = toml::from_str(r#"duration = "soon""#).unwrap();
        assert!(matches!(
            file.apply(LaunchConfig::default()),
            Err(ConfigFileError::Duration { field: "duration", .. })
        ));

        assert!(toml::from_str::<FileConfig>("unknown = 1").is_err());
    }

    #[test]
    fn test_zero_report_period_rejected() {
        let config = LaunchConfig::new("coap://localhost:5683").with_log_period(Duration::ZERO);
        assert_eq!(
            config.validate(),
            Err(ConfigurationError::InvalidReportPeriod { name: "log_period" })
        );

        let graphite = GraphiteConfig {
            period: Duration::ZERO,
            ..GraphiteConfig::default()
        };
        let config = LaunchConfig::new("coap://localhost:5683").with_graphite(graphite);
        assert_eq!(
            config.validate(),
            Err(ConfigurationError::InvalidReportPeriod {
                name: "graphite.period"
            })
        );

        let file: FileConfig = toml::from_str(
            r#"
            [graphite]
            period = "0s"
            "#,
        )
        .unwrap();
        assert!(matches!(
            file.apply(LaunchConfig::default()),
            Err(ConfigFileError::Configuration(
                ConfigurationError::InvalidReportPeriod { name: "graphite.period" }
            ))
        ));

        let file: FileConfig = toml::from_str(r#"log_period = "0s""#).unwrap();
        assert!(file.apply(LaunchConfig::default()).is_err());

        let config = LaunchConfig::new("coap://localhost:5683")
            .with_log_period(Duration::from_secs(10))
            .with_graphite(GraphiteConfig::default());
        assert_eq!(config.validate(), Ok(()));
    }
}
