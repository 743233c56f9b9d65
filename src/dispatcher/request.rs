//! Outbound request assembly
//!
//! Turns a task identifier and the current [`Settings`] into a
//! [`RequestDescriptor`]: fixed GET method, configured headers merged with a
//! single `Cookie` header, and an optional proxy drawn from the configured
//! [`ProxySetting`]. Nothing here performs I/O.

use crate::dispatcher::Settings;
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::Method;
use std::fmt;

/// Proxy configuration for outbound requests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ProxySetting {
    /// Connect directly
    #[default]
    None,

    /// Route every request through one proxy
    Single(String),

    /// Route each request through a proxy chosen uniformly at random
    Pool(Vec<String>),
}

impl ProxySetting {
    /// Picks the proxy for one request using the thread-local RNG
    pub fn select(&self) -> Option<String> {
        self.select_with(&mut rand::thread_rng())
    }

    /// Picks the proxy for one request using the given RNG
    ///
    /// An empty pool behaves like [`ProxySetting::None`].
    pub fn select_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<String> {
        match self {
            Self::None => None,
            Self::Single(address) => Some(address.clone()),
            Self::Pool(addresses) => addresses.choose(rng).cloned(),
        }
    }

    /// Returns true if no proxy is configured
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl fmt::Display for ProxySetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Single(address) => write!(f, "{}", address),
            Self::Pool(addresses) => write!(f, "pool of {}", addresses.len()),
        }
    }
}

impl From<Option<String>> for ProxySetting {
    fn from(value: Option<String>) -> Self {
        value.map_or(Self::None, Self::Single)
    }
}

impl From<Vec<String>> for ProxySetting {
    fn from(value: Vec<String>) -> Self {
        if value.is_empty() {
            Self::None
        } else {
            Self::Pool(value)
        }
    }
}

/// Everything needed to issue one fetch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    /// The target URL (task identifier)
    pub url: String,

    /// Always GET
    pub method: Method,

    /// Header name/value pairs, `Cookie` last
    pub headers: Vec<(String, String)>,

    /// Proxy address for this attempt, if any
    pub proxy: Option<String>,
}

impl RequestDescriptor {
    /// Looks up a header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Builds the request descriptor for one attempt
///
/// The cookie header is always present, even when no cookie string is
/// configured. A `Cookie` entry inside the header map is replaced by it.
pub fn build_request(id: &str, settings: &Settings) -> RequestDescriptor {
    build_request_with(id, settings, &mut rand::thread_rng())
}

/// Same as [`build_request`] with an explicit RNG for proxy selection
pub fn build_request_with<R: Rng + ?Sized>(
    id: &str,
    settings: &Settings,
    rng: &mut R,
) -> RequestDescriptor {
    let mut headers: Vec<(String, String)> = settings
        .headers
        .iter()
        .filter(|(name, _)| !name.eq_ignore_ascii_case("cookie"))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    headers.push(("Cookie".to_string(), settings.cookies.clone()));

    RequestDescriptor {
        url: id.to_string(),
        method: Method::GET,
        headers,
        proxy: settings.proxy.select_with(rng),
    }
}
