//! Process-wide response cache.
//!
//! Entries are keyed by method and upstream URL and never expire on their
//! own: the whole store is swapped for an empty one on a fixed interval.
//! The lock is held only for the map operation itself, never across an
//! upstream call.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use parking_lot::RwLock;
use reqwest::Url;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::shutdown::ShutdownSignal;

/// Identifies one cached upstream response: `"<METHOD>: <target>"`.
///
/// `target` is the outbound URL exactly as it was assembled, before any
/// URL parser gets to normalise it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build the key for a method and fully-qualified target URL.
    pub fn new(method: &Method, target: &str) -> Self {
        Self(format!("{method}: {target}"))
    }

    /// The key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A complete upstream response as it was received.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    /// Upstream URL the response was fetched from.
    pub url: Url,
    /// Upstream status code.
    pub status: StatusCode,
    /// Upstream headers in the order they were received.
    pub headers: Vec<(HeaderName, HeaderValue)>,
    /// Raw upstream body.
    pub body: Bytes,
}

impl CachedResponse {
    /// Capture a response from its parts.
    pub fn new(url: Url, status: StatusCode, headers: &HeaderMap, body: Bytes) -> Self {
        Self {
            url,
            status,
            headers: headers
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            body,
        }
    }
}

/// Keyed store of the last response seen for each request.
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: RwLock<HashMap<CacheKey, Arc<CachedResponse>>>,
}

impl ResponseCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the entry for a key.
    pub fn lookup(&self, key: &CacheKey) -> Option<Arc<CachedResponse>> {
        self.entries.read().get(key).cloned()
    }

    /// Store a response, replacing any previous entry for the key.
    pub fn store(&self, key: CacheKey, response: CachedResponse) -> Arc<CachedResponse> {
        let response = Arc::new(response);
        self.entries.write().insert(key, Arc::clone(&response));
        response
    }

    /// Discard every entry at once. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let old = std::mem::take(&mut *self.entries.write());
        old.len()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Spawn the background task that clears the cache every `interval`.
    ///
    /// The first clear happens one full interval after spawning. The task
    /// exits when `shutdown` is triggered.
    pub fn spawn_clear_task(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: ShutdownSignal,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);

        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let dropped = cache.clear();
                        crate::stats::record_cache_clear();
                        debug!(entries = dropped, "response cache cleared");
                    }
                    _ = shutdown.recv() => {
                        info!("cache clear task stopped");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn response(body: &'static str) -> CachedResponse {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        CachedResponse::new(
            url("https://app.asana.com/api/1.0/tasks"),
            StatusCode::OK,
            &headers,
            Bytes::from_static(body.as_bytes()),
        )
    }

    #[test]
    fn test_cache_key_format() {
        let key = CacheKey::new(&Method::GET, "https://app.asana.com/api/1.0/tasks?a=1");
        assert_eq!(key.as_str(), "GET: https://app.asana.com/api/1.0/tasks?a=1");
        assert_eq!(key.to_string(), key.as_str());
    }

    #[test]
    fn test_cache_key_is_exact() {
        let a = CacheKey::new(&Method::GET, "http://h/tasks?a=1&b=2");
        let b = CacheKey::new(&Method::GET, "http://h/tasks?b=2&a=1");
        let c = CacheKey::new(&Method::POST, "http://h/tasks?a=1&b=2");
        let d = CacheKey::new(&Method::GET, "http://h/tasks?a=1&b=2");

        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, d);
    }

    #[test]
    fn test_store_and_lookup() {
        let cache = ResponseCache::new();
        let key = CacheKey::new(&Method::GET, "http://h/tasks");

        assert!(cache.lookup(&key).is_none());

        cache.store(key.clone(), response("first"));
        cache.store(key.clone(), response("second"));

        let hit = cache.lookup(&key).unwrap();
        assert_eq!(hit.body, Bytes::from_static(b"second"));
        assert_eq!(hit.status, StatusCode::OK);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear_then_miss() {
        let cache = ResponseCache::new();
        let key = CacheKey::new(&Method::GET, "http://h/tasks");
        cache.store(key.clone(), response("body"));
        cache.store(
            CacheKey::new(&Method::GET, "http://h/tasks/1"),
            response("other"),
        );

        assert_eq!(cache.clear(), 2);
        assert!(cache.is_empty());
        assert!(cache.lookup(&key).is_none());
    }

    #[tokio::test]
    async fn test_clear_task_empties_idle_cache() {
        let cache = Arc::new(ResponseCache::new());
        cache.store(CacheKey::new(&Method::GET, "http://h/tasks"), response("body"));

        let shutdown = ShutdownSignal::new();
        let handle = cache.spawn_clear_task(Duration::from_millis(50), shutdown.clone());

        assert_eq!(cache.len(), 1);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cache.is_empty());

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("clear task should stop")
            .expect("clear task should not panic");
    }
}
