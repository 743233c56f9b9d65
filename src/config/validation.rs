use crate::config::types::{Config, DispatcherConfig, OutputConfig, ProxyConfig, RequestConfig};
use crate::{ConfigError, ConfigResult};
use url::Url;

/// Upper bound on concurrent fetches
const MAX_CONCURRENCY: usize = 256;

/// Validates the entire configuration
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_dispatcher_config(&config.dispatcher)?;
    validate_request_config(&config.request)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates dispatch settings
fn validate_dispatcher_config(config: &DispatcherConfig) -> ConfigResult<()> {
    if config.concurrency < 1 || config.concurrency > MAX_CONCURRENCY {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and {}, got {}",
            MAX_CONCURRENCY, config.concurrency
        )));
    }

    if config.retry_backoff_ms == 0 {
        return Err(ConfigError::Validation(
            "retry-backoff-ms must be > 0".to_string(),
        ));
    }

    if config.poll_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "poll-interval-ms must be > 0".to_string(),
        ));
    }

    Ok(())
}

/// Validates request settings
fn validate_request_config(config: &RequestConfig) -> ConfigResult<()> {
    if config.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "timeout-secs must be > 0".to_string(),
        ));
    }

    if let Some(proxy) = &config.proxy {
        validate_proxy(proxy)?;
    }

    for name in config.headers.keys() {
        validate_header_name(name)?;
    }

    Ok(())
}

/// Validates output settings
fn validate_output_config(config: &OutputConfig) -> ConfigResult<()> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates a proxy entry: every address must be an absolute URL with a host
fn validate_proxy(proxy: &ProxyConfig) -> ConfigResult<()> {
    let addresses = proxy.addresses();
    if addresses.is_empty() {
        return Err(ConfigError::InvalidProxy(
            "proxy pool cannot be empty".to_string(),
        ));
    }

    for address in addresses {
        let url = Url::parse(address)
            .map_err(|e| ConfigError::InvalidProxy(format!("'{}': {}", address, e)))?;

        if !matches!(url.scheme(), "http" | "https" | "socks5" | "socks5h") {
            return Err(ConfigError::InvalidProxy(format!(
                "'{}': unsupported scheme '{}'",
                address,
                url.scheme()
            )));
        }

        if url.host_str().is_none() {
            return Err(ConfigError::InvalidProxy(format!(
                "'{}': missing host",
                address
            )));
        }
    }

    Ok(())
}

/// Validates a header name (RFC 7230 token characters)
fn validate_header_name(name: &str) -> ConfigResult<()> {
    if name.is_empty() {
        return Err(ConfigError::Validation(
            "header names cannot be empty".to_string(),
        ));
    }

    let is_token = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c));
    if !is_token {
        return Err(ConfigError::Validation(format!(
            "header name '{}' contains invalid characters",
            name
        )));
    }

    Ok(())
}
