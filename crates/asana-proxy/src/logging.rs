//! Structured logging for the proxy.
//!
//! Wires `tracing` to a `tracing-subscriber` formatter. Levels accept the
//! names operators already pass to the proxy (`warning`, `fatal`, `panic`)
//! in addition to the `tracing` ones.
//!
//! # Example
//!
//! ```rust,ignore
//! use asana_proxy::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::new("debug"))?;
//! tracing::info!(cache_key = "GET: https://app.asana.com/api/1.0/tasks", "cache hit");
//! ```

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::{ProxyError, ProxyResult};

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level name.
    pub level: String,

    /// Whether to output JSON format.
    pub json_format: bool,

    /// Whether to include file/line info.
    pub file_line_info: bool,

    /// Whether to include target (module path).
    pub include_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new("info")
    }
}

impl LogConfig {
    /// Creates a human-readable configuration at the given level.
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            json_format: false,
            file_line_info: false,
            include_target: true,
        }
    }

    /// Switch to JSON output.
    #[must_use]
    pub fn json(mut self, json: bool) -> Self {
        self.json_format = json;
        self
    }
}

/// Parse a log level name.
///
/// `panic` and `fatal` map to `error`, `warning` to `warn`.
pub fn parse_level(level: &str) -> ProxyResult<Level> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" | "fatal" | "panic" => Ok(Level::ERROR),
        other => Err(ProxyError::logging(format!("not a valid log level: {other:?}"))),
    }
}

/// Initializes the logging subsystem.
///
/// `RUST_LOG`, when set, takes precedence over the configured level.
///
/// # Errors
///
/// Returns `ProxyError::Logging` if the level is invalid or a global
/// subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> ProxyResult<()> {
    let level = parse_level(&config.level)?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.to_string().to_ascii_lowercase()))
        .map_err(|e| ProxyError::logging(format!("Invalid log level: {e}")))?;

    if config.json_format {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_target(config.include_target)
            .with_filter(filter);

        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .map_err(|e| ProxyError::logging(e.to_string()))?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_target(config.include_target)
            .with_filter(filter);

        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .map_err(|e| ProxyError::logging(e.to_string()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert!(!config.json_format);
        assert_eq!(config.level, "info");
        assert!(LogConfig::new("debug").json(true).json_format);
    }

    #[test]
    fn test_parse_level_aliases() {
        assert_eq!(parse_level("warning").unwrap(), Level::WARN);
        assert_eq!(parse_level("fatal").unwrap(), Level::ERROR);
        assert_eq!(parse_level("panic").unwrap(), Level::ERROR);
        assert_eq!(parse_level("DEBUG").unwrap(), Level::DEBUG);
        assert_eq!(parse_level("trace").unwrap(), Level::TRACE);
    }

    #[test]
    fn test_parse_level_invalid() {
        let err = parse_level("verbose").unwrap_err();
        assert!(err.to_string().contains("not a valid log level"));
        assert!(matches!(err, ProxyError::Logging { .. }));
    }

    #[test]
    fn test_init_logging_rejects_invalid_level() {
        assert!(init_logging(&LogConfig::new("chatty")).is_err());
    }
}
