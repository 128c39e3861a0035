//! Asana Proxy - caching reverse proxy for the Asana REST API
//!
//! The proxy sits between internal tooling and `app.asana.com`. Tools talk to
//! it with HTTP Basic credentials; the proxy turns them into the bearer token
//! Asana expects, forwards the call, caches the answer and reshapes the task
//! endpoints into the small records the tooling consumes.
//!
//! # Architecture
//!
//! ```text
//!  client ──Basic──►  ┌───────────────────────────────────────┐  ──Bearer──►  Asana
//!                     │ RequestBuilder   (auth, URL, headers) │
//!                     │ ResponseCache    (method + URL key)   │
//!  client ◄─────────  │ ResponseTransformer (task rewrites)   │  ◄──────────
//!                     └───────────────────────────────────────┘
//!                        ▲ cleared every cache_clear_interval
//! ```
//!
//! # Example Usage
//!
//! ```bash
//! # Proxy the public API on :8089
//! $ asana-proxy
//!
//! # Custom upstream, JSON logs, diagnostics on :6060
//! $ ASANA_URL=https://asana.internal/api/1.0 LOG_JSON=true asana-proxy --debug
//! ```

#![doc(html_root_url = "https://docs.rs/asana-proxy/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod handler;
pub mod logging;
pub mod model;
pub mod request;
pub mod server;
pub mod shutdown;
pub mod stats;
pub mod transform;

pub use auth::{AuthOutcome, AuthTranslator};
pub use cache::{CacheKey, CachedResponse, ResponseCache};
pub use config::{ProxyConfig, ProxyConfigBuilder};
pub use diagnostics::DiagnosticsServer;
pub use error::{ProxyError, ProxyResult};
pub use handler::ProxyHandler;
pub use logging::{init_logging, LogConfig};
pub use server::ProxyServer;
pub use shutdown::ShutdownSignal;
pub use stats::ProxyStats;
pub use transform::{ResponseTransformer, Rewrite};

/// Proxy version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
