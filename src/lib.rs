//! Ripple-Fetch: a concurrency-bounded fetch dispatcher
//!
//! This crate drains a growing queue of URLs into concurrent HTTP fetches,
//! with a per-run concurrency cap, fixed inter-request delay, retries, proxy
//! rotation and start/pause/resume/stop control. Fetched content is handed to
//! caller hooks; a small SQLite table store is available to persist it.

pub mod config;
pub mod dispatcher;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Ripple-Fetch operations
#[derive(Debug, Error)]
pub enum RippleError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid proxy address: {0}")]
    InvalidProxy(String),
}

/// Why a single fetch attempt failed
///
/// This is what the error hook receives once a task has no retries left.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Request to {url} failed: {source}")]
    Transport { url: String, source: reqwest::Error },

    #[error("Failed to read body from {url}: {source}")]
    Body { url: String, source: reqwest::Error },

    #[error("Failed to build client for proxy '{proxy}': {source}")]
    Client { proxy: String, source: reqwest::Error },
}

impl FetchError {
    /// The HTTP status code, if the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true if the request timed out
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Transport { source, .. } | Self::Body { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// The URL the attempt targeted, when known
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Status { url, .. } | Self::Transport { url, .. } | Self::Body { url, .. } => {
                Some(url)
            }
            Self::Client { .. } => None,
        }
    }
}

/// Result type alias for Ripple-Fetch operations
pub type Result<T> = std::result::Result<T, RippleError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use dispatcher::{Dispatcher, ProxySetting, Settings};
pub use state::RunState;
