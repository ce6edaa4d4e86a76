//! Cache Manager Module
//!
//! Registry of named backends with bulk lifecycle and manual fallback chains.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::cache::pattern::prefixed_key;
use crate::cache::{CacheBackend, CacheOptions};
use crate::context::CacheContext;
use crate::error::{CacheError, Result};

// == Cache Manager ==
/// Name -> backend registry.
///
/// The manager does not own entry lifecycle; it only closes backends on
/// [`CacheManager::close_all`].
pub struct CacheManager {
    caches: DashMap<String, Arc<dyn CacheBackend>>,
    options: CacheOptions,
}

impl CacheManager {
    pub fn new(options: CacheOptions) -> Self {
        Self {
            caches: DashMap::new(),
            options,
        }
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    // == Registry ==
    /// Registers a backend, replacing any previous one under the same name.
    pub fn register_cache(&self, name: impl Into<String>, backend: Arc<dyn CacheBackend>) {
        let name = name.into();
        debug!(name = %name, kind = backend.kind(), "Registering cache backend");
        if self.caches.insert(name.clone(), backend).is_some() {
            info!(name = %name, "Replaced previously registered cache backend");
        }
    }

    /// Looks up a backend by name.
    ///
    /// # Errors
    /// `NotFound` if nothing is registered under `name`.
    pub fn get_cache(&self, name: &str) -> Result<Arc<dyn CacheBackend>> {
        self.caches
            .get(name)
            .map(|backend| backend.value().clone())
            .ok_or_else(|| CacheError::NotFound(format!("cache '{}'", name)))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.iter().map(|item| item.key().clone()).collect();
        names.sort();
        names
    }

    /// Prefixes `key` with the manager's key prefix.
    pub fn cache_key(&self, key: &str) -> String {
        prefixed_key(&self.options.key_prefix, key)
    }

    // == Lifecycle ==
    /// Closes every registered backend.
    ///
    /// A failing backend does not stop the others from being closed. Returns
    /// the first error encountered.
    pub async fn close_all(&self) -> Result<()> {
        // Snapshot first so no shard guard is held across an await.
        let backends: Vec<(String, Arc<dyn CacheBackend>)> = self
            .caches
            .iter()
            .map(|item| (item.key().clone(), item.value().clone()))
            .collect();

        let mut first_error: Option<CacheError> = None;
        for (name, backend) in backends {
            match backend.close().await {
                Ok(()) => info!(name = %name, "Closed cache backend"),
                Err(e) => {
                    warn!(name = %name, error = %e, "Failed to close cache backend");
                    first_error.get_or_insert(e);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    // == Fallback Chains ==
    /// Tries each named backend in order and returns the first hit.
    ///
    /// Unregistered names and backend errors are skipped. Fails with
    /// `NotFound` when no backend has the key.
    pub async fn get_with_fallback(
        &self,
        ctx: &CacheContext,
        names: &[&str],
        key: &str,
    ) -> Result<Vec<u8>> {
        for name in names {
            let backend = match self.get_cache(name) {
                Ok(backend) => backend,
                Err(_) => {
                    warn!(name, "Fallback chain names an unregistered cache");
                    continue;
                }
            };

            match backend.get(ctx, key).await {
                Ok(data) => {
                    debug!(name, key, "Fallback chain hit");
                    return Ok(data);
                }
                Err(e) if e.is_not_found() => continue,
                Err(e) => warn!(name, key, error = %e, "Cache read failed; trying next"),
            }
        }

        Err(CacheError::NotFound(key.to_string()))
    }

    /// Writes to every named backend, even after a failure.
    /// Returns the first error encountered.
    pub async fn write_through(
        &self,
        ctx: &CacheContext,
        names: &[&str],
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<()> {
        let mut first_error: Option<CacheError> = None;

        for name in names {
            let result = match self.get_cache(name) {
                Ok(backend) => backend.set(ctx, key, value.clone(), ttl).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(name, key, error = %e, "Write-through failed");
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new(CacheOptions::default())
    }
}
