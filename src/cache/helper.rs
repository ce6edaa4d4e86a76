//! Cache Helper Module
//!
//! JSON convenience and the get-or-set (compute on miss) pattern, layered on
//! any backend.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::CacheBackend;
use crate::context::CacheContext;
use crate::error::{CacheError, Result};

// == Cache Helper ==
/// Serialization and read-through helpers over a shared backend.
///
/// There is no request coalescing: concurrent misses on the same key each run
/// their compute function, and the last write wins.
#[derive(Clone)]
pub struct CacheHelper {
    backend: Arc<dyn CacheBackend>,
    /// Substituted by `set_json` when given a zero TTL
    default_ttl: Duration,
}

impl CacheHelper {
    /// Creates a helper using the backend's own default TTL.
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        let default_ttl = backend.options().default_ttl;
        Self {
            backend,
            default_ttl,
        }
    }

    pub fn with_default_ttl(backend: Arc<dyn CacheBackend>, default_ttl: Duration) -> Self {
        Self {
            backend,
            default_ttl,
        }
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    // == JSON ==
    /// Reads and decodes a JSON value.
    ///
    /// A decode failure is `Serialization`, distinct from `NotFound`.
    pub async fn get_json<T>(&self, ctx: &CacheContext, key: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let data = self.backend.get(ctx, key).await?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Encodes and stores a JSON value. A zero TTL takes the helper default.
    pub async fn set_json<T>(
        &self,
        ctx: &CacheContext,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let data = serde_json::to_vec(value)?;
        self.backend.set(ctx, key, data, self.resolve_ttl(ttl)).await
    }

    // == Get Or Set ==
    /// Returns the cached bytes, or computes, stores and returns them.
    ///
    /// Any read failure counts as a miss. A compute failure propagates as
    /// `Compute`. A store failure after a successful compute is logged and
    /// swallowed; the computed value is still returned.
    pub async fn get_or_set<F, Fut>(
        &self,
        ctx: &CacheContext,
        key: &str,
        compute: F,
    ) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<(Vec<u8>, Duration)>> + Send,
    {
        match self.backend.get(ctx, key).await {
            Ok(data) => return Ok(data),
            Err(e) => log_read_miss(key, &e),
        }

        let (data, ttl) = compute().await.map_err(CacheError::Compute)?;

        if let Err(e) = self.backend.set(ctx, key, data.clone(), ttl).await {
            warn!(key, error = %e, "Failed to store computed value; returning it uncached");
        }
        Ok(data)
    }

    /// JSON variant of [`CacheHelper::get_or_set`].
    ///
    /// The computed value is encoded once; those exact bytes are stored and
    /// decoded for the return value, so a miss returns what a later hit will.
    pub async fn get_or_set_json<T, F, Fut>(
        &self,
        ctx: &CacheContext,
        key: &str,
        compute: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<(T, Duration)>> + Send,
    {
        match self.get_json(ctx, key).await {
            Ok(value) => return Ok(value),
            Err(e) => log_read_miss(key, &e),
        }

        let (value, ttl) = compute().await.map_err(CacheError::Compute)?;
        let data = serde_json::to_vec(&value)?;

        if let Err(e) = self
            .backend
            .set(ctx, key, data.clone(), self.resolve_ttl(ttl))
            .await
        {
            warn!(key, error = %e, "Failed to store computed value; returning it uncached");
        }

        Ok(serde_json::from_slice(&data)?)
    }

    /// Pass-through to the backend.
    pub async fn invalidate_pattern(&self, ctx: &CacheContext, pattern: &str) -> Result<usize> {
        self.backend.invalidate_pattern(ctx, pattern).await
    }

    fn resolve_ttl(&self, ttl: Duration) -> Duration {
        if ttl.is_zero() {
            self.default_ttl
        } else {
            ttl
        }
    }
}

fn log_read_miss(key: &str, err: &CacheError) {
    if err.is_not_found() {
        debug!(key, "Cache miss");
    } else {
        warn!(key, error = %err, "Cache read failed; computing value");
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheOptions, LocalBackend};
    use serde::Deserialize;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        id: String,
        tags: Vec<String>,
        attrs: HashMap<String, HashMap<String, i64>>,
    }

    fn helper() -> CacheHelper {
        CacheHelper::new(Arc::new(LocalBackend::new(CacheOptions::default())))
    }

    fn ctx() -> CacheContext {
        CacheContext::background()
    }

    fn sample() -> Profile {
        let mut inner = HashMap::new();
        inner.insert("level".to_string(), 3);
        let mut attrs = HashMap::new();
        attrs.insert("game".to_string(), inner);
        attrs.insert("empty".to_string(), HashMap::new());
        Profile {
            id: "u1".to_string(),
            tags: Vec::new(),
            attrs,
        }
    }

    #[tokio::test]
    async fn test_json_round_trip() {
        let helper = helper();
        helper
            .set_json(&ctx(), "profile", &sample(), Duration::ZERO)
            .await
            .unwrap();

        let loaded: Profile = helper.get_json(&ctx(), "profile").await.unwrap();
        assert_eq!(loaded, sample());
    }

    #[tokio::test]
    async fn test_get_json_decode_failure_is_serialization() {
        let helper = helper();
        helper
            .backend()
            .set(&ctx(), "raw", b"not json".to_vec(), Duration::ZERO)
            .await
            .unwrap();

        let result: Result<Profile> = helper.get_json(&ctx(), "raw").await;
        assert!(matches!(result, Err(CacheError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_get_json_missing_is_not_found() {
        let result: Result<Profile> = helper().get_json(&ctx(), "missing").await;
        assert!(matches!(result, Err(CacheError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_get_or_set_computes_once_then_hits() {
        let helper = helper();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let data = helper
                .get_or_set(&ctx(), "bytes", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok((b"computed".to_vec(), Duration::from_secs(60)))
                })
                .await
                .unwrap();
            assert_eq!(data, b"computed");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_or_set_compute_error_propagates() {
        let result = helper()
            .get_or_set(&ctx(), "bytes", || async { Err(anyhow::anyhow!("db down")) })
            .await;
        assert!(matches!(result, Err(CacheError::Compute(_))));
    }

    #[tokio::test]
    async fn test_get_or_set_survives_store_failure() {
        let backend = Arc::new(LocalBackend::new(CacheOptions::default()));
        let helper = CacheHelper::new(backend.clone());
        backend.close().await.unwrap();

        let data = helper
            .get_or_set(&ctx(), "k", || async {
                Ok((b"fresh".to_vec(), Duration::from_secs(1)))
            })
            .await
            .unwrap();
        assert_eq!(data, b"fresh");
    }

    #[tokio::test]
    async fn test_get_or_set_json_populates_cache() {
        let helper = helper();
        let calls = AtomicUsize::new(0);

        let first: Profile = helper
            .get_or_set_json(&ctx(), "profile", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok((sample(), Duration::ZERO))
            })
            .await
            .unwrap();
        let second: Profile = helper.get_json(&ctx(), "profile").await.unwrap();

        assert_eq!(first, sample());
        assert_eq!(second, first);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_set_json_zero_ttl_uses_helper_default() {
        let backend = Arc::new(LocalBackend::new(CacheOptions::default()));
        let helper = CacheHelper::with_default_ttl(backend.clone(), Duration::from_millis(5));

        helper
            .set_json(&ctx(), "short", &42u32, Duration::ZERO)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let result: Result<u32> = helper.get_json(&ctx(), "short").await;
        assert!(matches!(result, Err(CacheError::NotFound(_))));
    }
}
