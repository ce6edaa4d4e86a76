//! Backend Factory
//!
//! Builds backends and the primary/fallback registry from configuration.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::cache::{CacheBackend, CacheManager, CacheOptions, LocalBackend, RemoteBackend};
use crate::config::{BackendKind, CacheConfig};
use crate::error::Result;

/// Registry name of the configured backend.
pub const PRIMARY_CACHE: &str = "primary";
/// Registry name of the in-process fallback.
pub const FALLBACK_CACHE: &str = "fallback";

/// Builds the configured backend.
///
/// # Errors
/// Construction failures are returned as-is: an unreachable remote endpoint
/// aborts startup instead of degrading to a no-op cache.
pub async fn build_backend(config: &CacheConfig) -> Result<Arc<dyn CacheBackend>> {
    let options = config.options();

    let backend: Arc<dyn CacheBackend> = match config.kind {
        BackendKind::Local => Arc::new(LocalBackend::with_sweep_interval(
            options,
            config.sweep_interval(),
        )),
        BackendKind::Remote => Arc::new(RemoteBackend::connect(&config.remote()?, options).await?),
    };

    info!(kind = backend.kind(), "Cache backend ready");
    Ok(backend)
}

/// Builds a manager holding the configured backend as [`PRIMARY_CACHE`] and a
/// small local cache as [`FALLBACK_CACHE`].
pub async fn build_manager(config: &CacheConfig) -> Result<CacheManager> {
    let primary = build_backend(config).await?;
    let fallback: Arc<dyn CacheBackend> = Arc::new(LocalBackend::with_sweep_interval(
        CacheOptions::new(Duration::from_secs(60), 100, "fallback:"),
        config.sweep_interval(),
    ));

    let manager = CacheManager::new(config.options());
    manager.register_cache(PRIMARY_CACHE, primary);
    manager.register_cache(FALLBACK_CACHE, fallback);
    Ok(manager)
}
