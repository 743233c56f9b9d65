use crate::dispatcher::{ProxySetting, DEFAULT_POLL_INTERVAL, DEFAULT_RETRY_BACKOFF};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Main configuration structure for Ripple-Fetch
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub request: RequestConfig,
    #[serde(default)]
    pub output: OutputConfig,
    /// Task identifiers queued before the run starts
    #[serde(default)]
    pub tasks: Vec<String>,
}

/// Dispatch behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    /// Maximum number of concurrent fetches
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Retries after a failed attempt
    #[serde(default)]
    pub retries: u32,

    /// Delay before every attempt (milliseconds)
    #[serde(rename = "delay-ms", default)]
    pub delay_ms: u64,

    /// Pause between a failure and its retry (milliseconds)
    #[serde(rename = "retry-backoff-ms", default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Empty-queue re-check period (milliseconds)
    #[serde(rename = "poll-interval-ms", default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            retries: 0,
            delay_ms: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Outbound request configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RequestConfig {
    /// Value sent in the `Cookie` header
    #[serde(default)]
    pub cookies: Option<String>,

    /// One proxy address or a pool to rotate through
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,

    /// Per-request timeout (seconds)
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Extra request headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            cookies: None,
            proxy: None,
            timeout_secs: default_timeout_secs(),
            headers: BTreeMap::new(),
        }
    }
}

/// Proxy entry: a single address or a list
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ProxyConfig {
    Single(String),
    Pool(Vec<String>),
}

impl ProxyConfig {
    /// All configured addresses
    pub fn addresses(&self) -> Vec<&str> {
        match self {
            Self::Single(address) => vec![address.as_str()],
            Self::Pool(addresses) => addresses.iter().map(String::as_str).collect(),
        }
    }
}

impl From<ProxyConfig> for ProxySetting {
    fn from(value: ProxyConfig) -> Self {
        match value {
            ProxyConfig::Single(address) => Self::Single(address),
            ProxyConfig::Pool(addresses) => addresses.into(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database fetched items are written to
    #[serde(rename = "database-path", default = "default_database_path")]
    pub database_path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_concurrency() -> usize {
    1
}

fn default_retry_backoff_ms() -> u64 {
    DEFAULT_RETRY_BACKOFF.as_millis() as u64
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_database_path() -> String {
    "./items.db".to_string()
}
