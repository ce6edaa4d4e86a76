//! Cache-Control stamping middleware.

use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::header::CACHE_CONTROL;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;

/// Directives written to every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheControlPolicy {
    /// `public` when true, `private` otherwise
    pub public: bool,
    /// Omitted when zero
    pub max_age: Duration,
}

impl CacheControlPolicy {
    pub fn public(max_age: Duration) -> Self {
        Self {
            public: true,
            max_age,
        }
    }

    pub fn private(max_age: Duration) -> Self {
        Self {
            public: false,
            max_age,
        }
    }

    /// Renders the header value, e.g. `public, max-age=60`.
    pub fn header_value(&self) -> String {
        let visibility = if self.public { "public" } else { "private" };
        let seconds = self.max_age.as_secs();
        if seconds > 0 {
            format!("{}, max-age={}", visibility, seconds)
        } else {
            visibility.to_string()
        }
    }
}

/// Stamps `Cache-Control` on the response, replacing any value the handler set.
pub async fn cache_control(
    State(policy): State<CacheControlPolicy>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&policy.header_value()) {
        response.headers_mut().insert(CACHE_CONTROL, value);
    }
    response
}
