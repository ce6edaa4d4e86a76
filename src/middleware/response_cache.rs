//! Response Cache Middleware
//!
//! Serves cached responses for repeatable requests and captures successful
//! responses on a miss. Use with `axum::middleware::from_fn_with_state`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::header::{
    ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, COOKIE,
    SET_COOKIE, USER_AGENT,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::CacheBackend;
use crate::context::CacheContext;
use crate::middleware::{fingerprint, X_CACHE};

/// Caller-supplied rule to bypass the cache for a request.
pub type SkipPredicate = Arc<dyn Fn(&Request) -> bool + Send + Sync>;

// == Cached HTTP Response ==
/// Stored form of a response. The body is base64 in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedHttpResponse {
    pub status_code: u16,
    pub content_type: String,
    #[serde(with = "base64_body")]
    pub body: Vec<u8>,
    /// Lowercase header name -> values, in received order
    pub headers: BTreeMap<String, Vec<String>>,
}

impl CachedHttpResponse {
    /// Captures a response, dropping `excluded` headers and any cache tag.
    pub fn capture(
        status: StatusCode,
        headers: &HeaderMap,
        body: Vec<u8>,
        excluded: &[HeaderName],
    ) -> Self {
        let mut stored: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in headers {
            if excluded.contains(name) || name.as_str() == X_CACHE {
                continue;
            }
            if let Ok(value) = value.to_str() {
                stored
                    .entry(name.as_str().to_string())
                    .or_default()
                    .push(value.to_string());
            }
        }

        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        Self {
            status_code: status.as_u16(),
            content_type,
            body,
            headers: stored,
        }
    }

    /// Rebuilds the response, skipping `excluded` headers.
    ///
    /// Returns None if the stored status code is not valid.
    pub fn into_response(self, excluded: &[HeaderName]) -> Option<Response> {
        let CachedHttpResponse {
            status_code,
            content_type,
            body,
            headers: stored,
        } = self;

        let status = StatusCode::from_u16(status_code).ok()?;
        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;

        let headers = response.headers_mut();
        for (name, values) in stored {
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                continue;
            };
            if excluded.contains(&name) {
                continue;
            }
            for value in values {
                if let Ok(value) = HeaderValue::from_str(&value) {
                    headers.append(name.clone(), value);
                }
            }
        }

        if !headers.contains_key(CONTENT_TYPE) && !content_type.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&content_type) {
                headers.insert(CONTENT_TYPE, value);
            }
        }

        Some(response)
    }
}

mod base64_body {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

// == Config ==
/// Response cache policy.
#[derive(Clone)]
pub struct ResponseCacheConfig {
    /// TTL of stored responses
    pub ttl: Duration,
    /// Prepended to every fingerprint
    pub key_prefix: String,
    /// Methods eligible for caching
    pub methods: Vec<Method>,
    /// Request headers that take part in the fingerprint
    pub vary_headers: Vec<HeaderName>,
    /// Response headers never stored or replayed
    pub excluded_headers: Vec<HeaderName>,
    /// Responses declaring or carrying a larger body are not stored
    pub max_body_bytes: usize,
    /// Bound on each backend call made by the middleware
    pub backend_timeout: Duration,
    pub skip: Option<SkipPredicate>,
}

impl ResponseCacheConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Adds a bypass rule on top of the built-in ones.
    pub fn with_skip<F>(mut self, skip: F) -> Self
    where
        F: Fn(&Request) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Arc::new(skip));
        self
    }
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            key_prefix: "http:".to_string(),
            methods: vec![Method::GET],
            vary_headers: vec![ACCEPT, ACCEPT_LANGUAGE, USER_AGENT],
            excluded_headers: vec![SET_COOKIE, COOKIE, AUTHORIZATION],
            max_body_bytes: 1024 * 1024,
            backend_timeout: Duration::from_secs(1),
            skip: None,
        }
    }
}

// == State ==
/// Middleware state: the backend plus the policy.
#[derive(Clone)]
pub struct ResponseCacheState {
    backend: Arc<dyn CacheBackend>,
    config: Arc<ResponseCacheConfig>,
}

impl ResponseCacheState {
    pub fn new(backend: Arc<dyn CacheBackend>, config: ResponseCacheConfig) -> Self {
        Self {
            backend,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ResponseCacheConfig {
        &self.config
    }

    /// Why the request must bypass the cache, if it must.
    fn skip_reason(&self, request: &Request) -> Option<&'static str> {
        if !self.config.methods.contains(request.method()) {
            return Some("method");
        }
        if request.headers().contains_key(AUTHORIZATION) {
            return Some("authorization");
        }
        let no_cache = request
            .headers()
            .get_all(CACHE_CONTROL)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(|directive| directive.trim().to_ascii_lowercase())
            .any(|directive| directive == "no-cache" || directive == "no-store");
        if no_cache {
            return Some("cache-control");
        }
        if self.config.skip.as_ref().is_some_and(|skip| skip(request)) {
            return Some("predicate");
        }
        None
    }

    fn backend_context(&self) -> CacheContext {
        CacheContext::with_timeout(self.config.backend_timeout)
    }

    /// Any failure here is treated as a miss.
    async fn lookup(&self, key: &str) -> Option<Response> {
        let data = match self.backend.get(&self.backend_context(), key).await {
            Ok(data) => data,
            Err(e) if e.is_not_found() => return None,
            Err(e) => {
                warn!(key, error = %e, "Response cache lookup failed; treating as miss");
                return None;
            }
        };

        let cached: CachedHttpResponse = match serde_json::from_slice(&data) {
            Ok(cached) => cached,
            Err(e) => {
                warn!(key, error = %e, "Discarding undecodable cached response");
                return None;
            }
        };

        let response = cached.into_response(&self.config.excluded_headers);
        if response.is_none() {
            warn!(key, "Discarding cached response with invalid status");
        }
        response
    }

    /// Stores the response if it qualifies and hands it back unchanged.
    async fn store(&self, key: &str, response: Response) -> Response {
        if response.status() != StatusCode::OK || self.declared_too_large(response.headers()) {
            return response;
        }

        let (parts, body) = response.into_parts();
        let bytes = match to_bytes(body, usize::MAX).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "Failed to read response body");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

        if !bytes.is_empty() && bytes.len() <= self.config.max_body_bytes {
            let cached = CachedHttpResponse::capture(
                parts.status,
                &parts.headers,
                bytes.to_vec(),
                &self.config.excluded_headers,
            );
            match serde_json::to_vec(&cached) {
                Ok(data) => {
                    let result = self
                        .backend
                        .set(&self.backend_context(), key, data, self.config.ttl)
                        .await;
                    match result {
                        Ok(()) => debug!(key, "Stored response"),
                        Err(e) => warn!(key, error = %e, "Failed to store response"),
                    }
                }
                Err(e) => warn!(key, error = %e, "Failed to encode response"),
            }
        }

        Response::from_parts(parts, Body::from(bytes))
    }

    fn declared_too_large(&self, headers: &HeaderMap) -> bool {
        headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok())
            .is_some_and(|len| len > self.config.max_body_bytes)
    }
}

// == Middleware ==
/// Response caching middleware.
///
/// Requests that must bypass the cache are forwarded untouched and tagged
/// `X-Cache: MISS`. Otherwise a hit is replayed without running the handler
/// and tagged `HIT`; a miss runs the handler, stores a non-empty 200 body and
/// is tagged `MISS`. Backend failures never fail the request.
pub async fn response_cache(
    State(state): State<ResponseCacheState>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(reason) = state.skip_reason(&request) {
        debug!(reason, path = %request.uri().path(), "Bypassing response cache");
        return tagged(next.run(request).await, "MISS");
    }

    let key = fingerprint(
        &state.config.key_prefix,
        &request,
        &state.config.vary_headers,
    );

    if let Some(hit) = state.lookup(&key).await {
        debug!(key = %key, "Response cache hit");
        return tagged(hit, "HIT");
    }

    let response = next.run(request).await;
    tagged(state.store(&key, response).await, "MISS")
}

fn tagged(mut response: Response, tag: &'static str) -> Response {
    response
        .headers_mut()
        .insert(HeaderName::from_static(X_CACHE), HeaderValue::from_static(tag));
    response
}
