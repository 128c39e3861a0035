//! Proxy HTTP server.
//!
//! Accepts HTTP/1.1 connections and hands every request to the shared
//! [`ProxyHandler`]. Alongside the listener it runs the cache clear task
//! and, in debug mode, the diagnostics listener. All three stop on the
//! same [`ShutdownSignal`].

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::cache::ResponseCache;
use crate::config::ProxyConfig;
use crate::diagnostics::DiagnosticsServer;
use crate::error::{ProxyError, ProxyResult};
use crate::handler::ProxyHandler;
use crate::shutdown::{ConnectionTracker, ShutdownSignal};
use crate::stats::ProxyStats;

/// The proxy server.
pub struct ProxyServer {
    config: Arc<ProxyConfig>,
    handler: Arc<ProxyHandler>,
    cache: Arc<ResponseCache>,
    stats: ProxyStats,
}

impl ProxyServer {
    /// Create a server. Fails on invalid configuration.
    pub fn new(config: ProxyConfig) -> ProxyResult<Self> {
        config.validate()?;

        let config = Arc::new(config);
        let cache = Arc::new(ResponseCache::new());
        let handler = Arc::new(ProxyHandler::new(&config, cache.clone())?);

        Ok(Self {
            config,
            handler,
            cache,
            stats: ProxyStats::new(),
        })
    }

    /// Serve `/debug/metrics` from `handle`.
    #[must_use]
    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.stats = self.stats.with_prometheus(handle);
        self
    }

    /// The configuration the server runs with.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// The shared response cache.
    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Start time and metrics handle.
    pub fn stats(&self) -> &ProxyStats {
        &self.stats
    }

    /// Run until SIGINT or SIGTERM.
    pub async fn run(self) -> ProxyResult<()> {
        let shutdown = ShutdownSignal::with_os_signals()
            .map_err(|e| ProxyError::server(format!("failed to install signal handlers: {e}")))?;
        self.run_with_shutdown(shutdown).await
    }

    /// Bind the configured addresses and run until `shutdown` fires.
    pub async fn run_with_shutdown(self, shutdown: ShutdownSignal) -> ProxyResult<()> {
        let addr = self.config.listen_socket_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ProxyError::server(format!("failed to bind {addr}: {e}")))?;

        if self.config.debug {
            let debug_addr = self.config.debug_socket_addr()?;
            let debug_listener = TcpListener::bind(debug_addr).await.map_err(|e| {
                ProxyError::server(format!("failed to bind diagnostics {debug_addr}: {e}"))
            })?;
            info!("Debug listening. See http://{}/debug/vars", debug_addr);

            let diagnostics = DiagnosticsServer::new(self.cache.clone(), self.stats.clone());
            tokio::spawn(diagnostics.serve(debug_listener, shutdown.clone()));
        }

        self.serve(listener, shutdown).await
    }

    /// Serve the proxy on an already bound listener until `shutdown` fires.
    ///
    /// Open connections get `shutdown_timeout` to finish before this
    /// returns.
    pub async fn serve(self, listener: TcpListener, shutdown: ShutdownSignal) -> ProxyResult<()> {
        let local_addr = listener.local_addr()?;
        info!("server listening {}", local_addr);
        info!("proxying to upstream {}", self.config.upstream_url);

        let clear_task = self
            .cache
            .spawn_clear_task(self.config.cache_clear_interval, shutdown.clone());
        let tracker = ConnectionTracker::new();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let handler = Arc::clone(&self.handler);
                            let token = tracker.acquire();
                            let shutdown = shutdown.clone();

                            tokio::spawn(async move {
                                serve_connection(stream, peer, handler, shutdown).await;
                                drop(token);
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }

                _ = shutdown.recv() => {
                    info!("shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }

        drop(listener);

        let grace = self.config.shutdown_timeout;
        info!(
            "Waiting up to {:?} for {} connections to close",
            grace,
            tracker.active_connections()
        );

        tokio::select! {
            _ = tracker.wait_idle() => {
                info!("All connections closed");
            }
            _ = tokio::time::sleep(grace) => {
                warn!(
                    "Shutdown timeout reached, {} connections still active",
                    tracker.active_connections()
                );
            }
        }

        if let Err(e) = clear_task.await {
            warn!("cache clear task ended abnormally: {}", e);
        }

        info!("proxy stopped");
        Ok(())
    }
}

/// Serve one connection, finishing the in-flight request on shutdown.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<ProxyHandler>,
    shutdown: ShutdownSignal,
) {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let handler = Arc::clone(&handler);
        async move { Ok::<_, Infallible>(handler.handle(req).await) }
    });

    let conn = http1::Builder::new().serve_connection(io, service);
    tokio::pin!(conn);

    let mut stopping = shutdown.recv();
    let mut draining = false;

    let result = loop {
        tokio::select! {
            result = conn.as_mut() => break result,
            _ = &mut stopping, if !draining => {
                debug!("closing connection from {} for shutdown", peer);
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    };

    if let Err(e) = result {
        debug!("Connection error from {}: {}", peer, e);
    }
}
