//! HTTP fetcher and per-attempt worker
//!
//! This module handles all network traffic for the dispatcher, including:
//! - Building HTTP clients, one per proxy address
//! - Issuing a single GET for a [`RequestDescriptor`]
//! - Classifying the response as success or [`FetchError`]
//! - Running one attempt of a task and reporting through the hooks

use crate::dispatcher::hooks::HookRegistry;
use crate::dispatcher::request::{build_request, RequestDescriptor};
use crate::dispatcher::Settings;
use crate::FetchError;
use reqwest::{redirect::Policy, Client};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Default user agent; a `User-Agent` entry in the header map overrides it
pub const USER_AGENT: &str = concat!("ripple-fetch/", env!("CARGO_PKG_VERSION"));

/// Builds an HTTP client, optionally routed through a proxy
///
/// # Arguments
///
/// * `proxy` - Proxy address (`http://`, `https://` or `socks5://`), or `None`
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - The proxy address was rejected or the TLS backend failed
pub fn build_http_client(proxy: Option<&str>) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true);

    if let Some(address) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(address)?);
    }

    builder.build()
}

/// Issues requests, reusing one client per proxy address
#[derive(Debug, Default)]
pub struct Fetcher {
    clients: Mutex<HashMap<Option<String>, Client>>,
}

impl Fetcher {
    /// Creates a fetcher with an empty client cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached client for `proxy`, building it on first use
    fn client_for(&self, proxy: Option<&str>) -> Result<Client, FetchError> {
        let key = proxy.map(str::to_string);
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let client = build_http_client(proxy).map_err(|source| FetchError::Client {
            proxy: key.clone().unwrap_or_default(),
            source,
        })?;
        tracing::debug!("Built HTTP client for proxy {:?}", key);
        clients.insert(key, client.clone());
        Ok(client)
    }

    /// Fetches one request descriptor and returns the response body
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - 2xx response body
    /// * `Err(FetchError::Status)` - Any non-2xx status
    /// * `Err(FetchError::Transport)` - Connection, TLS, timeout or header errors
    /// * `Err(FetchError::Body)` - The body could not be read
    pub async fn fetch(
        &self,
        request: &RequestDescriptor,
        timeout: Duration,
    ) -> Result<String, FetchError> {
        let client = self.client_for(request.proxy.as_deref())?;

        let mut builder = client
            .request(request.method.clone(), &request.url)
            .timeout(timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: request.url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: request.url.clone(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|source| FetchError::Body {
            url: request.url.clone(),
            source,
        })
    }
}

/// One attempt at fetching a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    /// Task identifier
    pub id: String,

    /// Retries left after this attempt fails
    pub remaining_retries: u32,

    /// Zero for the first attempt
    pub number: u32,
}

impl Attempt {
    /// First attempt for `id` with the given retry budget
    pub fn first(id: impl Into<String>, retries: u32) -> Self {
        Self {
            id: id.into(),
            remaining_retries: retries,
            number: 0,
        }
    }

    /// The follow-up attempt after a failure
    fn retry(self) -> Self {
        Self {
            id: self.id,
            remaining_retries: self.remaining_retries.saturating_sub(1),
            number: self.number + 1,
        }
    }
}

/// How an attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The item hook was called
    Succeeded,

    /// The error hook was called; the task is dropped
    Failed,

    /// The attempt failed with budget left; this retry should run after the backoff
    Retry(Attempt),
}

/// Runs one attempt of a task
///
/// Sleeps for the configured delay, fetches, and reports the outcome. Hooks are
/// looked up when they fire, so a hook replaced mid-flight is honoured.
pub async fn execute(
    fetcher: &Fetcher,
    hooks: &HookRegistry,
    settings: Arc<Settings>,
    attempt: Attempt,
) -> AttemptOutcome {
    if !settings.delay.is_zero() {
        tokio::time::sleep(settings.delay).await;
    }

    let request = build_request(&attempt.id, &settings);
    tracing::debug!(
        "Fetching {} (attempt {}, proxy {:?})",
        attempt.id,
        attempt.number + 1,
        request.proxy
    );

    match fetcher.fetch(&request, settings.timeout).await {
        Ok(body) => {
            hooks.current().item(body, &attempt.id);
            AttemptOutcome::Succeeded
        }
        Err(error) if attempt.remaining_retries > 0 => {
            tracing::warn!(
                "Attempt {} for {} failed: {}; {} retries left",
                attempt.number + 1,
                attempt.id,
                error,
                attempt.remaining_retries
            );
            AttemptOutcome::Retry(attempt.retry())
        }
        Err(error) => {
            hooks.current().error(error, &attempt.id);
            AttemptOutcome::Failed
        }
    }
}
