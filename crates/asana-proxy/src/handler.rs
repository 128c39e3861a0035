//! Per-request proxy pipeline.
//!
//! ```text
//! inbound ─► RequestBuilder ─► cache key ─┬─ hit ──────────────────────┐
//!            (auth rewrite)               └─ miss ─► upstream ─► store ┤
//!                                                       │              ▼
//!                                                     error    ResponseTransformer
//!                                                       ▼              ▼
//!                                                  500 + text     caller
//! ```

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::{Method, Request, Response, StatusCode, Uri};
use http_body_util::Full;
use reqwest::Client;
use tracing::{debug, error, info, Instrument};
use uuid::Uuid;

use crate::auth::AuthTranslator;
use crate::cache::{CachedResponse, ResponseCache};
use crate::config::ProxyConfig;
use crate::error::{ProxyError, ProxyResult};
use crate::request::{is_hop_by_hop_header, OutboundRequest, RequestBuilder};
use crate::stats;
use crate::transform::ResponseTransformer;

/// Response body type produced by the proxy.
pub type ProxyBody = Full<Bytes>;

/// Orchestrates request translation, caching and body rewrites.
#[derive(Debug)]
pub struct ProxyHandler {
    requests: RequestBuilder,
    transformer: ResponseTransformer,
    client: Client,
    cache: Arc<ResponseCache>,
}

impl ProxyHandler {
    /// Create a handler from configuration and the shared cache.
    pub fn new(config: &ProxyConfig, cache: Arc<ResponseCache>) -> ProxyResult<Self> {
        let client = Client::builder()
            .timeout(config.upstream_timeout)
            .build()
            .map_err(|e| ProxyError::config(format!("failed to create client: {e}")))?;

        Ok(Self {
            requests: RequestBuilder::new(config.upstream_base()?, AuthTranslator::new()?),
            transformer: ResponseTransformer::new()?,
            client,
            cache,
        })
    }

    /// The shared response cache.
    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Handle an inbound request. The inbound body is never read.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<ProxyBody> {
        let request_id = Uuid::now_v7();
        let span = tracing::info_span!(
            "request",
            request_id = %request_id,
            method = %req.method(),
            path = %req.uri().path(),
        );

        self.proxy(req.method(), req.uri(), req.headers())
            .instrument(span)
            .await
    }

    /// Proxy one request described by its method, URI and headers.
    pub async fn proxy(&self, method: &Method, uri: &Uri, headers: &HeaderMap) -> Response<ProxyBody> {
        let start = Instant::now();

        let outbound = match self.requests.build(method, uri, headers) {
            Ok(outbound) => outbound,
            Err(e) => {
                error!(error = %e, "cannot build upstream request");
                return error_response(&e);
            }
        };
        stats::record_request(outbound.auth);

        let key = outbound.cache_key();

        let cached = self.cache.lookup(&key);
        stats::record_cache_lookup(cached.is_some());

        let entry = match cached {
            Some(entry) => {
                info!(cache_key = %key, "cache hit");
                entry
            }
            None => {
                let fetch_start = Instant::now();
                let fetched = self.fetch(&outbound).await;
                stats::record_upstream(fetched.is_ok(), fetch_start.elapsed());

                match fetched {
                    Ok(response) => {
                        let entry = self.cache.store(key, response);
                        stats::set_cache_entries(self.cache.len());
                        entry
                    }
                    Err(e) => {
                        error!(
                            error = %e,
                            duration_ms = %start.elapsed().as_millis(),
                            "upstream request failed"
                        );
                        return error_response(&e);
                    }
                }
            }
        };

        let response = self.respond(&entry);
        info!(
            status = %response.status(),
            duration_ms = %start.elapsed().as_millis(),
            "request completed"
        );
        response
    }

    /// Send the request upstream and read the whole response.
    async fn fetch(&self, outbound: &OutboundRequest) -> ProxyResult<CachedResponse> {
        let response = self
            .client
            .request(outbound.method.clone(), outbound.url.clone())
            .headers(outbound.headers.clone())
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        debug!(%status, bytes = body.len(), url = %outbound.url, "upstream responded");

        Ok(CachedResponse::new(outbound.url.clone(), status, &headers, body))
    }

    /// Build the caller response from a cached entry.
    ///
    /// Upstream headers are replayed in order; `content-length` is left to
    /// the server since the body may have been rewritten.
    fn respond(&self, entry: &CachedResponse) -> Response<ProxyBody> {
        let transformed = self
            .transformer
            .transform(entry.url.path(), entry.status, &entry.body);
        stats::record_transform(&transformed.outcome);

        let mut response = Response::new(Full::new(transformed.body));
        *response.status_mut() = entry.status;

        let headers = response.headers_mut();
        for (name, value) in &entry.headers {
            if name == CONTENT_LENGTH || is_hop_by_hop_header(name) {
                continue;
            }
            debug!("{}: {:?}", name, value);
            headers.append(name.clone(), value.clone());
        }

        response
    }
}

/// 500 response whose body is the error text.
fn error_response(err: &ProxyError) -> Response<ProxyBody> {
    let mut response = Response::new(Full::new(Bytes::from(err.to_string())));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::AUTHORIZATION;
    use http_body_util::BodyExt;

    fn handler(upstream: &str) -> ProxyHandler {
        let config = ProxyConfig::builder().upstream_url(upstream).build().unwrap();
        ProxyHandler::new(&config, Arc::new(ResponseCache::new())).unwrap()
    }

    async fn body_string(response: Response<ProxyBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_upstream_error_is_500_with_error_text() {
        // nothing listens on port 1
        let handler = handler("http://127.0.0.1:1/api/1.0");
        let uri: Uri = "/tasks".parse().unwrap();

        let response = handler.proxy(&Method::GET, &uri, &HeaderMap::new()).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain; charset=utf-8");
        assert!(!body_string(response).await.is_empty());
        assert!(handler.cache().is_empty());
    }

    #[tokio::test]
    async fn test_cache_hit_skips_upstream() {
        let handler = handler("http://127.0.0.1:1/api/1.0");
        let uri: Uri = "/projects/7".parse().unwrap();

        let outbound = handler
            .requests
            .build(&Method::GET, &uri, &HeaderMap::new())
            .unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("11"));
        handler.cache().store(
            outbound.cache_key(),
            CachedResponse::new(
                outbound.url.clone(),
                StatusCode::OK,
                &headers,
                Bytes::from_static(br#"{"data":{}}"#),
            ),
        );

        let response = handler.proxy(&Method::GET, &uri, &HeaderMap::new()).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert!(!response.headers().contains_key(CONTENT_LENGTH));
        assert_eq!(body_string(response).await, r#"{"data":{}}"#);
    }

    #[tokio::test]
    async fn test_cached_status_and_body_replayed_for_errors() {
        let handler = handler("http://127.0.0.1:1/api/1.0");
        let uri: Uri = "/tasks".parse().unwrap();
        let outbound = handler
            .requests
            .build(&Method::GET, &uri, &HeaderMap::new())
            .unwrap();
        handler.cache().store(
            outbound.cache_key(),
            CachedResponse::new(
                outbound.url.clone(),
                StatusCode::NOT_FOUND,
                &HeaderMap::new(),
                Bytes::from_static(b"not json"),
            ),
        );

        let response = handler.proxy(&Method::GET, &uri, &HeaderMap::new()).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(response).await, "not json");
    }
    #[tokio::test]
    async fn test_request_path_records_metrics() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let prometheus = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let handler = handler("http://127.0.0.1:1/api/1.0");
        let uri: Uri = "/tasks".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dTpw"));
        let _ = handler.proxy(&Method::GET, &uri, &headers).await;

        let out = prometheus.render();
        assert!(out.contains(r#"asana_proxy_requests_total{auth="translated"} 1"#));
        assert!(out.contains(r#"asana_proxy_cache_lookups_total{result="miss"} 1"#));
        assert!(out.contains(r#"asana_proxy_upstream_requests_total{outcome="error"} 1"#));
    }
}
