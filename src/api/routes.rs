//! API Routes
//!
//! Configures the Axum router with the cache management endpoints.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    cache_health_handler, delete_handler, flush_handler, get_handler, health_handler,
    invalidate_handler, set_handler, stats_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /cache/stats` - Backend statistics
/// - `POST /cache/flush` - Remove every key under the prefix
/// - `POST /cache/invalidate` - Remove keys matching a glob
/// - `POST /cache/set` - Store a JSON value
/// - `GET /cache/:key` - Read a JSON value
/// - `DELETE /cache/:key` - Delete a key
/// - `GET /health` - Liveness
/// - `GET /health/cache` - Backend round-trip probe
///
/// # Middleware
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    // Configure CORS middleware
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Static segments take precedence over `:key`
    Router::new()
        .route("/cache/stats", get(stats_handler))
        .route("/cache/flush", post(flush_handler))
        .route("/cache/invalidate", post(invalidate_handler))
        .route("/cache/set", post(set_handler))
        .route("/cache/:key", get(get_handler).delete(delete_handler))
        .route("/health", get(health_handler))
        .route("/health/cache", get(cache_health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
