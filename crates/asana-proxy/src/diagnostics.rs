//! Debug-mode diagnostics listener.
//!
//! Served on `debug_addr` only when debug mode is on:
//!
//! - `GET /debug/health` - liveness, uptime and version
//! - `GET /debug/vars` - start time, uptime and cache size
//! - `GET /debug/metrics` - Prometheus text rendering of the proxy metrics
//!
//! Anything else gets a JSON 404.

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::cache::ResponseCache;
use crate::shutdown::ShutdownSignal;
use crate::stats::ProxyStats;

/// Liveness report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Always `healthy` while the process serves requests.
    pub status: String,
    /// Seconds since start.
    pub uptime_seconds: u64,
    /// Crate version.
    pub version: String,
}

/// Runtime variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarsReport {
    /// When the proxy started.
    pub started_at: DateTime<Utc>,
    /// Seconds since start.
    pub uptime_seconds: u64,
    /// Entries currently cached.
    pub cache_entries: usize,
}

/// Serves the `/debug/*` endpoints.
#[derive(Debug, Clone)]
pub struct DiagnosticsServer {
    cache: Arc<ResponseCache>,
    stats: ProxyStats,
}

impl DiagnosticsServer {
    /// Create a diagnostics server over the proxy's shared state.
    pub fn new(cache: Arc<ResponseCache>, stats: ProxyStats) -> Self {
        Self { cache, stats }
    }

    /// Current liveness report.
    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "healthy".to_string(),
            uptime_seconds: self.stats.uptime_seconds(),
            version: crate::VERSION.to_string(),
        }
    }

    /// Current runtime variables.
    pub fn vars(&self) -> VarsReport {
        VarsReport {
            started_at: self.stats.started_at(),
            uptime_seconds: self.stats.uptime_seconds(),
            cache_entries: self.cache.len(),
        }
    }

    /// Route one diagnostics request.
    pub fn route(&self, method: &Method, path: &str) -> Response<Full<Bytes>> {
        if method != Method::GET {
            return json_response(
                StatusCode::METHOD_NOT_ALLOWED,
                &serde_json::json!({"error": "method not allowed"}),
            );
        }

        match path {
            "/debug/health" => json_response(StatusCode::OK, &self.health()),
            "/debug/vars" => json_response(StatusCode::OK, &self.vars()),
            "/debug/metrics" => match self.stats.render() {
                Some(text) => {
                    let mut response = Response::new(Full::new(Bytes::from(text)));
                    response.headers_mut().insert(
                        CONTENT_TYPE,
                        HeaderValue::from_static("text/plain; version=0.0.4"),
                    );
                    response
                }
                None => json_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    &serde_json::json!({"error": "metrics recorder not installed"}),
                ),
            },
            _ => json_response(
                StatusCode::NOT_FOUND,
                &serde_json::json!({"error": "not found", "path": path}),
            ),
        }
    }

    /// Accept connections until `shutdown` fires.
    pub async fn serve(self, listener: TcpListener, shutdown: ShutdownSignal) {
        let this = Arc::new(self);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let this = Arc::clone(&this);
                            tokio::spawn(async move {
                                let service = service_fn(move |req: Request<Incoming>| {
                                    let response = this.route(req.method(), req.uri().path());
                                    async move { Ok::<_, Infallible>(response) }
                                });

                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(TokioIo::new(stream), service)
                                    .await
                                {
                                    debug!("diagnostics connection error from {}: {}", peer, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept diagnostics connection: {}", e);
                        }
                    }
                }

                _ = shutdown.recv() => {
                    info!("diagnostics listener stopped");
                    break;
                }
            }
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());

    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
