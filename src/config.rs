use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tracing::trace;

use crate::correlation::FlapPolicy;

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    /// Remote poller section (only needed by the poller binary)
    pub poller: Option<PollerConfig>,

    /// Correlation engine section (defaults apply if missing)
    pub correlation: Option<CorrelationConfig>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct PollerConfig {
    /// Base URL of the poller backend
    pub backend_url: String,

    /// Monitoring location used when the poller has to register itself
    pub location: Option<String>,

    /// File that persists the monitoring system id across restarts
    pub settings_path: Option<PathBuf>,

    /// Customer/reference metadata copied into every scan report
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// Timeout for a single service check in seconds
    #[serde(default = "default_check_timeout")]
    pub check_timeout_secs: u64,

    /// Timeout for backend requests in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl PollerConfig {
    /// Configuration with defaults for everything but the backend
    pub fn new(backend_url: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into(),
            location: None,
            settings_path: None,
            metadata: HashMap::new(),
            check_timeout_secs: default_check_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct CorrelationConfig {
    /// Number of distinct monitors that must report a service down (inclusive)
    #[serde(default = "default_wide_spread_threshold")]
    pub wide_spread_threshold: usize,

    /// Number of transitions within the flap interval that make a monitor flap (inclusive)
    #[serde(default = "default_flap_count")]
    pub flap_count: usize,

    /// Sliding window for flap detection in milliseconds
    #[serde(default = "default_flap_interval")]
    pub flap_interval_ms: u64,

    /// What happens to a flap tracker after it reported flapping
    #[serde(default)]
    pub flap_policy: FlapPolicy,

    /// Lost afflictions older than this are dropped (never, if unset)
    pub affliction_timeout_secs: Option<u64>,

    /// How often the correlator sweeps expired facts in milliseconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
}

impl CorrelationConfig {
    pub fn flap_interval(&self) -> Duration {
        Duration::from_millis(self.flap_interval_ms)
    }

    pub fn affliction_timeout(&self) -> Option<Duration> {
        self.affliction_timeout_secs.map(Duration::from_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        // a zero period would make tokio's interval panic
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            wide_spread_threshold: default_wide_spread_threshold(),
            flap_count: default_flap_count(),
            flap_interval_ms: default_flap_interval(),
            flap_policy: FlapPolicy::default(),
            affliction_timeout_secs: None,
            sweep_interval_ms: default_sweep_interval(),
        }
    }
}

fn default_check_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn default_wide_spread_threshold() -> usize {
    3
}

fn default_flap_count() -> usize {
    3
}

fn default_flap_interval() -> u64 {
    300_000 // 5 minutes
}

fn default_sweep_interval() -> u64 {
    1_000
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    parse_config(&file_content)
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    serde_json::from_str(content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
