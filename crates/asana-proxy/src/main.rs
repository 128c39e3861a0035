//! Asana Proxy - Entry point

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use asana_proxy::config::{
    parse_duration, DEFAULT_DEBUG_ADDR, DEFAULT_LISTEN_ADDR, DEFAULT_UPSTREAM_URL,
};
use asana_proxy::{init_logging, stats, LogConfig, ProxyConfig, ProxyServer};

/// Command-line arguments. Every flag can also come from the environment.
#[derive(Parser, Debug)]
#[command(name = "asana-proxy")]
#[command(about = "Caching Asana API proxy that turns Basic auth into bearer tokens")]
#[command(version)]
struct Args {
    /// Upstream Asana API base URL
    #[arg(long, env = "ASANA_URL", default_value = DEFAULT_UPSTREAM_URL)]
    asana_url: String,

    /// Address to listen on (`:8089` binds every interface)
    #[arg(long, env = "SERVER_ADDR", default_value = DEFAULT_LISTEN_ADDR)]
    server_addr: String,

    /// Log level: trace, debug, info, warning, error, fatal, panic
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Debug mode: debug logging plus the diagnostics listener
    #[arg(long, env = "DEBUG")]
    debug: bool,

    /// Address of the diagnostics listener
    #[arg(long, env = "DEBUG_ADDR", default_value = DEFAULT_DEBUG_ADDR)]
    debug_addr: String,

    /// How often the response cache is emptied (e.g. `60s`, `5m`)
    #[arg(
        long,
        env = "CACHE_CLEAR_INTERVAL",
        default_value = "60s",
        value_parser = parse_duration
    )]
    cache_clear_interval: Duration,

    /// Timeout for a single upstream request
    #[arg(long, env = "UPSTREAM_TIMEOUT", default_value = "30s", value_parser = parse_duration)]
    upstream_timeout: Duration,

    /// Grace period for open connections on shutdown
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value = "10s", value_parser = parse_duration)]
    shutdown_timeout: Duration,
}

impl Args {
    fn into_config(self) -> Result<ProxyConfig> {
        ProxyConfig::builder()
            .upstream_url(self.asana_url)
            .listen_addr(self.server_addr)
            .log_level(self.log_level)
            .log_json(self.log_json)
            .debug(self.debug)
            .debug_addr(self.debug_addr)
            .cache_clear_interval(self.cache_clear_interval)
            .upstream_timeout(self.upstream_timeout)
            .shutdown_timeout(self.shutdown_timeout)
            .build()
            .context("invalid configuration")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Args::parse().into_config()?;

    init_logging(&LogConfig::new(config.effective_log_level()).json(config.log_json))
        .context("failed to initialize logging")?;
    info!("Level of logging: {}", config.effective_log_level());
    info!("Starting asana-proxy v{}", asana_proxy::VERSION);

    let debug = config.debug;
    let mut server = ProxyServer::new(config).context("failed to create server")?;
    if debug {
        let handle = stats::install_recorder().context("failed to install metrics recorder")?;
        server = server.with_prometheus(handle);
    }

    server
        .run()
        .await
        .context("server error")?;

    Ok(())
}
