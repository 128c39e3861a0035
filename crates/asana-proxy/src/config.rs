//! Configuration for the Asana proxy.

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use reqwest::Url;

use crate::error::{ProxyError, ProxyResult};

/// Default upstream API base URL.
pub const DEFAULT_UPSTREAM_URL: &str = "https://app.asana.com/api/1.0";

/// Default proxy listen address.
pub const DEFAULT_LISTEN_ADDR: &str = ":8089";

/// Default diagnostics listen address.
pub const DEFAULT_DEBUG_ADDR: &str = ":6060";

/// Proxy configuration.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Upstream API base URL (scheme, host and base path).
    pub upstream_url: String,
    /// Address the proxy listens on. `:port` binds every interface.
    pub listen_addr: String,
    /// Timeout for a single upstream request.
    pub upstream_timeout: Duration,
    /// How often the response cache is emptied.
    pub cache_clear_interval: Duration,
    /// Grace period given to open connections on shutdown.
    pub shutdown_timeout: Duration,
    /// Log level (`trace`, `debug`, `info`, `warning`, `error`, `fatal`, `panic`).
    pub log_level: String,
    /// Emit logs as JSON lines.
    pub log_json: bool,
    /// Debug mode: forces debug logging and starts the diagnostics listener.
    pub debug: bool,
    /// Address of the diagnostics listener.
    pub debug_addr: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            upstream_timeout: Duration::from_secs(30),
            cache_clear_interval: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(10),
            log_level: "info".to_string(),
            log_json: false,
            debug: false,
            debug_addr: DEFAULT_DEBUG_ADDR.to_string(),
        }
    }
}

impl ProxyConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ProxyConfigBuilder {
        ProxyConfigBuilder::default()
    }

    /// Parse the upstream base URL.
    pub fn upstream_base(&self) -> ProxyResult<Url> {
        let url = Url::parse(&self.upstream_url)
            .map_err(|e| ProxyError::config(format!("invalid upstream_url: {e}")))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ProxyError::config(
                "upstream_url must start with http:// or https://",
            ));
        }

        if url.host_str().is_none() {
            return Err(ProxyError::config("upstream_url must have a host"));
        }

        Ok(url)
    }

    /// Resolve the proxy listen address.
    pub fn listen_socket_addr(&self) -> ProxyResult<SocketAddr> {
        parse_listen_addr(&self.listen_addr)
    }

    /// Resolve the diagnostics listen address.
    pub fn debug_socket_addr(&self) -> ProxyResult<SocketAddr> {
        parse_listen_addr(&self.debug_addr)
    }

    /// The log level actually applied, taking debug mode into account.
    pub fn effective_log_level(&self) -> &str {
        if self.debug {
            "debug"
        } else {
            &self.log_level
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ProxyResult<()> {
        self.upstream_base()?;
        self.listen_socket_addr()?;

        if self.debug {
            self.debug_socket_addr()?;
        }

        if self.cache_clear_interval.is_zero() {
            return Err(ProxyError::config("cache_clear_interval must be positive"));
        }

        crate::logging::parse_level(&self.log_level)?;

        Ok(())
    }
}

/// Parse a listen address.
///
/// Accepts `host:port`, `ip:port` and the bare `:port` form, which binds
/// every IPv4 interface.
pub fn parse_listen_addr(addr: &str) -> ProxyResult<SocketAddr> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Err(ProxyError::config("listen address is empty"));
    }

    let addr = if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    };

    if let Ok(parsed) = addr.parse::<SocketAddr>() {
        return Ok(parsed);
    }

    addr.to_socket_addrs()
        .map_err(|e| ProxyError::config(format!("invalid listen address '{addr}': {e}")))?
        .next()
        .ok_or_else(|| ProxyError::config(format!("listen address '{addr}' did not resolve")))
}

/// Builder for `ProxyConfig`.
#[derive(Debug, Default)]
pub struct ProxyConfigBuilder {
    config: ProxyConfig,
}

impl ProxyConfigBuilder {
    /// Set the upstream URL.
    #[must_use]
    pub fn upstream_url(mut self, url: impl Into<String>) -> Self {
        self.config.upstream_url = url.into();
        self
    }

    /// Set the listen address.
    #[must_use]
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the upstream timeout.
    #[must_use]
    pub fn upstream_timeout(mut self, timeout: Duration) -> Self {
        self.config.upstream_timeout = timeout;
        self
    }

    /// Set the cache clear interval.
    #[must_use]
    pub fn cache_clear_interval(mut self, interval: Duration) -> Self {
        self.config.cache_clear_interval = interval;
        self
    }

    /// Set the shutdown grace period.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Set the log level.
    #[must_use]
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.log_level = level.into();
        self
    }

    /// Emit JSON logs.
    #[must_use]
    pub fn log_json(mut self, json: bool) -> Self {
        self.config.log_json = json;
        self
    }

    /// Enable debug mode.
    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Set the diagnostics listen address.
    #[must_use]
    pub fn debug_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.debug_addr = addr.into();
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ProxyResult<ProxyConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Parse a duration such as `60`, `60s`, `500ms`, `1m` or `1h`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let invalid = || format!("invalid duration '{s}'");

    type Scale = fn(u64) -> Option<Duration>;

    let (number, scale): (&str, Scale) = if let Some(n) = s.strip_suffix("ms") {
        (n, |ms| Some(Duration::from_millis(ms)))
    } else if let Some(n) = s.strip_suffix('s') {
        (n, |secs| Some(Duration::from_secs(secs)))
    } else if let Some(n) = s.strip_suffix('m') {
        (n, |m| m.checked_mul(60).map(Duration::from_secs))
    } else if let Some(n) = s.strip_suffix('h') {
        (n, |h| h.checked_mul(3600).map(Duration::from_secs))
    } else {
        (s, |secs| Some(Duration::from_secs(secs)))
    };

    number
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(scale)
        .ok_or_else(invalid)
}
