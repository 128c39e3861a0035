//! Outbound request construction.
//!
//! An inbound request is mapped onto the upstream API by keeping its
//! method, headers and query string, and joining its path onto the
//! upstream base path.
//!
//! The assembled target keeps the inbound query byte for byte and is what
//! requests are cached under. The parsed [`Url`] handed to the HTTP client
//! is normalised on the way: `'` in a query goes out as `%27`, for one.

use http::header::{HeaderMap, HeaderName, CONTENT_LENGTH, HOST};
use http::{Method, Uri};
use reqwest::Url;

use crate::auth::{AuthOutcome, AuthTranslator};
use crate::cache::CacheKey;
use crate::error::{ProxyError, ProxyResult};

/// Headers that describe a single connection and are never forwarded.
pub static HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Check if a header is hop-by-hop.
pub fn is_hop_by_hop_header(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// A request ready to be sent upstream.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// HTTP method, unchanged from the inbound request.
    pub method: Method,
    /// Upstream URL exactly as assembled from the inbound request.
    pub target: String,
    /// `target` parsed for the HTTP client.
    pub url: Url,
    /// Headers to send, with `Authorization` translated.
    pub headers: HeaderMap,
    /// What happened to the `Authorization` header.
    pub auth: AuthOutcome,
}

impl OutboundRequest {
    /// The cache key identifying this request.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(&self.method, &self.target)
    }
}

/// Builds outbound requests against a fixed upstream base URL.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    base: Url,
    auth: AuthTranslator,
}

impl RequestBuilder {
    /// Create a builder for the given upstream base URL.
    pub fn new(base: Url, auth: AuthTranslator) -> Self {
        Self { base, auth }
    }

    /// Build the outbound request for an inbound method, URI and headers.
    ///
    /// Inbound headers are cloned; connection-level headers (`host`,
    /// `content-length`, hop-by-hop) are dropped.
    pub fn build(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
    ) -> ProxyResult<OutboundRequest> {
        let target = self.outbound_target(uri)?;
        let url = Url::parse(&target)
            .map_err(|e| ProxyError::request(format!("invalid outbound URL {target}: {e}")))?;

        let mut outbound_headers = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers {
            if name == HOST || name == CONTENT_LENGTH || is_hop_by_hop_header(name) {
                continue;
            }
            outbound_headers.append(name.clone(), value.clone());
        }

        let auth = self.auth.rewrite_headers(&mut outbound_headers);

        Ok(OutboundRequest {
            method: method.clone(),
            target,
            url,
            headers: outbound_headers,
            auth,
        })
    }

    /// Rebuild an inbound URI on top of the upstream base URL.
    ///
    /// The query string is copied byte for byte, including a bare
    /// trailing `?`.
    pub fn outbound_target(&self, uri: &Uri) -> ProxyResult<String> {
        let mut authority = self
            .base
            .host_str()
            .ok_or_else(|| ProxyError::request("upstream base URL has no host"))?
            .to_string();
        if let Some(port) = self.base.port() {
            authority.push(':');
            authority.push_str(&port.to_string());
        }

        let mut raw = format!(
            "{}://{}{}",
            self.base.scheme(),
            authority,
            join_path(self.base.path(), uri.path())
        );
        if let Some(query) = uri.query() {
            raw.push('?');
            raw.push_str(query);
        }

        Ok(raw)
    }
}

/// Join two URL paths segment-wise and clean the result lexically.
///
/// Empty and `.` segments are dropped, `..` removes the previous segment,
/// and the result never ends with `/` unless it is the root.
pub fn join_path(base: &str, path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in base.split('/').chain(path.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }

    format!("/{}", segments.join("/"))
}
