//! Prometheus metrics for the proxy.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `asana_proxy_requests_total` | Counter | `auth` | Requests received |
//! | `asana_proxy_cache_lookups_total` | Counter | `result` | Cache hits and misses |
//! | `asana_proxy_cache_entries` | Gauge | - | Entries currently cached |
//! | `asana_proxy_cache_clears_total` | Counter | - | Periodic cache clears |
//! | `asana_proxy_upstream_requests_total` | Counter | `outcome` | Upstream calls |
//! | `asana_proxy_upstream_duration_seconds` | Histogram | - | Upstream latency |
//! | `asana_proxy_rewrites_total` | Counter | `rewrite`, `outcome` | Body rewrites |
//!
//! Recording goes through the `metrics` facade and is a no-op until a
//! recorder is installed. In debug mode [`install_recorder`] installs a
//! Prometheus recorder whose handle the diagnostics listener renders.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::auth::AuthOutcome;
use crate::error::{ProxyError, ProxyResult};
use crate::transform::TransformOutcome;

const REQUESTS_TOTAL: &str = "asana_proxy_requests_total";
const CACHE_LOOKUPS_TOTAL: &str = "asana_proxy_cache_lookups_total";
const CACHE_ENTRIES: &str = "asana_proxy_cache_entries";
const CACHE_CLEARS_TOTAL: &str = "asana_proxy_cache_clears_total";
const UPSTREAM_REQUESTS_TOTAL: &str = "asana_proxy_upstream_requests_total";
const UPSTREAM_DURATION_SECONDS: &str = "asana_proxy_upstream_duration_seconds";
const REWRITES_TOTAL: &str = "asana_proxy_rewrites_total";

/// Process start time plus the handle used to render metrics.
#[derive(Debug, Clone)]
pub struct ProxyStats {
    started_at: DateTime<Utc>,
    started: Instant,
    prometheus: Option<PrometheusHandle>,
}

impl Default for ProxyStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyStats {
    /// Stats starting now, with no metrics handle.
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
            prometheus: None,
        }
    }

    /// Attach the handle metrics are rendered from.
    #[must_use]
    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }

    /// When the proxy started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Seconds since start.
    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Metrics in Prometheus text format, if a handle is attached.
    pub fn render(&self) -> Option<String> {
        self.prometheus.as_ref().map(PrometheusHandle::render)
    }
}

/// Install the global Prometheus recorder.
///
/// # Errors
///
/// Returns `ProxyError::Server` if a recorder is already installed.
pub fn install_recorder() -> ProxyResult<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ProxyError::server(format!("failed to install metrics recorder: {e}")))?;

    describe_metrics();
    Ok(handle)
}

fn describe_metrics() {
    describe_counter!(REQUESTS_TOTAL, "Requests received, by authorization outcome");
    describe_counter!(CACHE_LOOKUPS_TOTAL, "Response cache lookups, by result");
    describe_gauge!(CACHE_ENTRIES, "Entries currently in the response cache");
    describe_counter!(CACHE_CLEARS_TOTAL, "Periodic response cache clears");
    describe_counter!(UPSTREAM_REQUESTS_TOTAL, "Upstream calls, by outcome");
    describe_histogram!(UPSTREAM_DURATION_SECONDS, "Upstream call duration in seconds");
    describe_counter!(REWRITES_TOTAL, "Response body rewrites, by rewrite and outcome");
}

/// Records an inbound request and what happened to its credential.
pub fn record_request(auth: AuthOutcome) {
    counter!(REQUESTS_TOTAL, "auth" => auth.as_str()).increment(1);
}

/// Records a cache lookup.
pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!(CACHE_LOOKUPS_TOTAL, "result" => result).increment(1);
}

/// Records the current number of cache entries.
#[allow(clippy::cast_precision_loss)]
pub fn set_cache_entries(entries: usize) {
    gauge!(CACHE_ENTRIES).set(entries as f64);
}

/// Records a periodic cache clear.
pub fn record_cache_clear() {
    counter!(CACHE_CLEARS_TOTAL).increment(1);
    gauge!(CACHE_ENTRIES).set(0.0);
}

/// Records a completed or failed upstream call.
pub fn record_upstream(ok: bool, duration: Duration) {
    let outcome = if ok { "ok" } else { "error" };
    counter!(UPSTREAM_REQUESTS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(UPSTREAM_DURATION_SECONDS).record(duration.as_secs_f64());
}

/// Records the result of running a body through the transformer.
pub fn record_transform(outcome: &TransformOutcome) {
    let (rewrite, result) = match outcome {
        TransformOutcome::Skipped => return,
        TransformOutcome::Rewritten(rewrite) => (rewrite, "rewritten"),
        TransformOutcome::Unmatched(rewrite) => (rewrite, "unmatched"),
        TransformOutcome::Failed(rewrite) => (rewrite, "failed"),
    };

    counter!(
        REWRITES_TOTAL,
        "rewrite" => rewrite.as_str(),
        "outcome" => result
    )
    .increment(1);
}
