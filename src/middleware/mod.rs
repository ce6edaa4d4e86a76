//! HTTP Middleware Module
//!
//! Axum middlewares built on the cache backends.
//!
//! # Middlewares
//! - Response cache: serves and populates cached GET responses
//! - Invalidate-on-write: clears patterns after a successful write
//! - Cache-Control: stamps a fixed caching policy on every response

mod cache_control;
mod fingerprint;
mod invalidate;
mod response_cache;

pub use cache_control::{cache_control, CacheControlPolicy};
pub use fingerprint::fingerprint;
pub use invalidate::{invalidate_on_write, InvalidateState};
pub use response_cache::{
    response_cache, CachedHttpResponse, ResponseCacheConfig, ResponseCacheState, SkipPredicate,
};

/// Response header carrying `HIT` or `MISS`.
pub const X_CACHE: &str = "x-cache";

/// Identity of the caller, inserted as a request extension by whatever
/// authenticates the request. When present it is part of the fingerprint, so
/// users never share cached responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);
