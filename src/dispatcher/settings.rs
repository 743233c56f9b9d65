//! Runtime settings for a dispatcher
//!
//! Settings are snapshotted when a fetch attempt is dispatched, so changes
//! apply to the next attempt and never to one already in flight.

use crate::config::Config;
use crate::dispatcher::ProxySetting;
use std::collections::BTreeMap;
use std::time::Duration;

/// Fixed pause between a failed attempt and its retry
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(1000);

/// How often an empty queue is re-checked while the run is active
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Per-request timeout used when none is configured
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Dispatcher settings
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Maximum number of fetches outstanding at once (always >= 1)
    pub concurrency: usize,

    /// Number of extra attempts after the first failure
    pub retries: u32,

    /// Delay before every attempt, retries included
    pub delay: Duration,

    /// Pause between a failed attempt and its retry
    pub retry_backoff: Duration,

    /// Re-check period for an empty queue
    pub poll_interval: Duration,

    /// Timeout applied to each network call
    pub timeout: Duration,

    /// Proxy selection
    pub proxy: ProxySetting,

    /// Extra request headers
    pub headers: BTreeMap<String, String>,

    /// Value of the `Cookie` header
    pub cookies: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            concurrency: 1,
            retries: 0,
            delay: Duration::ZERO,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            proxy: ProxySetting::None,
            headers: BTreeMap::new(),
            cookies: String::new(),
        }
    }
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        let dispatcher = &config.dispatcher;
        let request = &config.request;

        Self {
            concurrency: dispatcher.concurrency.max(1),
            retries: dispatcher.retries,
            delay: Duration::from_millis(dispatcher.delay_ms),
            retry_backoff: Duration::from_millis(dispatcher.retry_backoff_ms),
            poll_interval: Duration::from_millis(dispatcher.poll_interval_ms),
            timeout: Duration::from_secs(request.timeout_secs),
            proxy: request.proxy.clone().map(Into::into).unwrap_or_default(),
            headers: request.headers.clone(),
            cookies: request.cookies.clone().unwrap_or_default(),
        }
    }
}
