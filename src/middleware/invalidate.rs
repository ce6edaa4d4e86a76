//! Invalidate-on-write middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, warn};

use crate::cache::CacheBackend;
use crate::context::CacheContext;

/// Backend and the patterns a successful write makes stale.
#[derive(Clone)]
pub struct InvalidateState {
    backend: Arc<dyn CacheBackend>,
    patterns: Arc<[String]>,
    backend_timeout: Duration,
}

impl InvalidateState {
    pub fn new<I, S>(backend: Arc<dyn CacheBackend>, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            backend,
            patterns: patterns.into_iter().map(Into::into).collect(),
            backend_timeout: Duration::from_secs(1),
        }
    }

    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }
}

/// Runs the handler, then invalidates every pattern if the response is 2xx.
///
/// Invalidation failures are logged; the response is returned regardless.
pub async fn invalidate_on_write(
    State(state): State<InvalidateState>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;
    if !response.status().is_success() {
        return response;
    }

    let ctx = CacheContext::with_timeout(state.backend_timeout);
    for pattern in state.patterns.iter() {
        match state.backend.invalidate_pattern(&ctx, pattern).await {
            Ok(removed) => debug!(pattern = %pattern, removed, "Invalidated after write"),
            Err(e) => warn!(pattern = %pattern, error = %e, "Invalidation after write failed"),
        }
    }

    response
}
