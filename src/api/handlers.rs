//! API Handlers
//!
//! HTTP request handlers for the cache management endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::cache::{
    build_manager, BackendStats, CacheBackend, CacheManager, CacheService, HealthChecker,
    HealthReport, PRIMARY_CACHE,
};
use crate::config::Config;
use crate::context::CacheContext;
use crate::error::{CacheError, Result};
use crate::models::{
    validate_key, DeleteResponse, FlushResponse, GetResponse, HealthResponse, InvalidateRequest,
    InvalidateResponse, SetRequest, SetResponse,
};

/// Bound on the backend work of a single management request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Application state shared across all handlers.
///
/// Everything is reference counted; cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Every registered backend, closed together on shutdown
    pub manager: Arc<CacheManager>,
    /// Service over the primary backend
    pub cache: CacheService,
    pub health: HealthChecker,
}

impl AppState {
    /// Creates state over the manager's primary backend.
    ///
    /// # Errors
    /// `NotFound` if no primary backend is registered.
    pub fn new(manager: Arc<CacheManager>) -> Result<Self> {
        let primary = manager.get_cache(PRIMARY_CACHE)?;
        Ok(Self {
            cache: CacheService::new(primary.clone()),
            health: HealthChecker::new(primary),
            manager,
        })
    }

    /// Creates state around a single backend registered as the primary.
    pub fn with_backend(backend: Arc<dyn CacheBackend>) -> Self {
        let manager = CacheManager::new(backend.options().clone());
        manager.register_cache(PRIMARY_CACHE, backend.clone());
        Self {
            cache: CacheService::new(backend.clone()),
            health: HealthChecker::new(backend),
            manager: Arc::new(manager),
        }
    }

    /// Builds every backend from configuration.
    ///
    /// # Errors
    /// Backend construction failures, e.g. an unreachable remote endpoint.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let manager = build_manager(&config.cache).await?;
        Self::new(Arc::new(manager))
    }
}

fn request_context() -> CacheContext {
    CacheContext::with_timeout(REQUEST_TIMEOUT)
}

/// Handler for GET /cache/stats
pub async fn stats_handler(State(state): State<AppState>) -> Result<Json<BackendStats>> {
    let stats = state.cache.stats(&request_context()).await?;
    Ok(Json(stats))
}

/// Handler for POST /cache/flush
pub async fn flush_handler(State(state): State<AppState>) -> Result<Json<FlushResponse>> {
    state.cache.flush(&request_context()).await?;
    Ok(Json(FlushResponse::new()))
}

/// Handler for POST /cache/invalidate
pub async fn invalidate_handler(
    State(state): State<AppState>,
    Json(req): Json<InvalidateRequest>,
) -> Result<Json<InvalidateResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let removed = state
        .cache
        .invalidate_pattern(&request_context(), &req.pattern)
        .await?;

    Ok(Json(InvalidateResponse::new(req.pattern, removed)))
}

/// Handler for POST /cache/set
///
/// Stores any JSON value. A missing or zero TTL takes the backend default.
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let ttl = Duration::from_secs(req.ttl.unwrap_or(0));
    state
        .cache
        .set_value(&request_context(), &req.key, &req.value, ttl)
        .await?;

    Ok(Json(SetResponse::new(req.key)))
}

/// Handler for GET /cache/:key
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    if let Some(error_msg) = validate_key(&key) {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let value = state.cache.get_value(&request_context(), &key).await?;
    Ok(Json(GetResponse::new(key, value)))
}

/// Handler for DELETE /cache/:key
///
/// Deleting an absent key succeeds; `existed` reports which case it was.
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    if let Some(error_msg) = validate_key(&key) {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let ctx = request_context();
    let existed = state.cache.backend().exists(&ctx, &key).await?;
    state.cache.delete_value(&ctx, &key).await?;

    Ok(Json(DeleteResponse::new(key, existed)))
}

/// Handler for GET /health
///
/// Liveness only; does not touch the cache.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

/// Handler for GET /health/cache
///
/// Runs a probe against the primary backend. Unhealthy reports are served
/// with 503.
pub async fn cache_health_handler(
    State(state): State<AppState>,
) -> (StatusCode, Json<HealthReport>) {
    let report = state.health.check(&request_context()).await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
