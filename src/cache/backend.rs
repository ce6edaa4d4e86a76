//! Backend Contract
//!
//! The seam every storage engine implements, plus the richer capability set
//! (counters, conditional and batched writes, TTL queries) exposed through
//! [`CounterCapableBackend`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::cache::CacheStats;
use crate::context::CacheContext;
use crate::error::Result;

// == Cache Options ==
/// Per-backend settings, fixed at construction.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// TTL substituted when a write passes a zero TTL. Zero means "never expires".
    pub default_ttl: Duration,
    /// Advisory only; no eviction is performed.
    pub max_size: usize,
    /// Prepended to every key this backend stores.
    pub key_prefix: String,
}

impl CacheOptions {
    pub fn new(default_ttl: Duration, max_size: usize, key_prefix: impl Into<String>) -> Self {
        Self {
            default_ttl,
            max_size,
            key_prefix: key_prefix.into(),
        }
    }

    /// Resolves a per-call TTL against the default.
    ///
    /// Returns None when the entry should never expire.
    pub fn effective_ttl(&self, ttl: Duration) -> Option<Duration> {
        let ttl = if ttl.is_zero() { self.default_ttl } else { ttl };
        (!ttl.is_zero()).then_some(ttl)
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            max_size: 1000,
            key_prefix: "cache:".to_string(),
        }
    }
}

// == Backend Stats ==
/// Stats snapshot whose shape depends on the backend.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendStats {
    Local {
        entries: usize,
        max_size: usize,
        key_prefix: String,
        #[serde(flatten)]
        counters: CacheStats,
        hit_rate: f64,
    },
    Remote {
        endpoint: String,
        database: i64,
        key_prefix: String,
        keys: usize,
        #[serde(flatten)]
        counters: CacheStats,
        hit_rate: f64,
    },
}

impl BackendStats {
    pub fn counters(&self) -> &CacheStats {
        match self {
            BackendStats::Local { counters, .. } | BackendStats::Remote { counters, .. } => {
                counters
            }
        }
    }
}

// == Cache Backend ==
/// Uniform storage contract.
///
/// Every data operation is bound to a [`CacheContext`]; a cancelled or expired
/// context fails the call with `Canceled` / `DeadlineExceeded`. After
/// [`CacheBackend::close`] every operation fails with `Closed`.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short backend identifier ("local", "remote").
    fn kind(&self) -> &'static str;

    fn options(&self) -> &CacheOptions;

    /// Fails with `NotFound` if the key is absent or expired.
    async fn get(&self, ctx: &CacheContext, key: &str) -> Result<Vec<u8>>;

    /// A zero `ttl` takes the backend's default TTL.
    async fn set(&self, ctx: &CacheContext, key: &str, value: Vec<u8>, ttl: Duration)
        -> Result<()>;

    /// Idempotent: deleting an absent key succeeds.
    async fn delete(&self, ctx: &CacheContext, key: &str) -> Result<()>;

    async fn exists(&self, ctx: &CacheContext, key: &str) -> Result<bool>;

    /// Removes every key under this backend's prefix.
    async fn flush(&self, ctx: &CacheContext) -> Result<()>;

    /// Removes every key whose logical name matches the glob `pattern`.
    /// Returns how many keys were removed.
    async fn invalidate_pattern(&self, ctx: &CacheContext, pattern: &str) -> Result<usize>;

    async fn close(&self) -> Result<()>;

    async fn stats(&self, ctx: &CacheContext) -> Result<BackendStats>;

    /// The richer capability set, when the backend offers it.
    fn counters(&self) -> Option<&dyn CounterCapableBackend> {
        None
    }
}

// == Counter Capable Backend ==
/// Atomic counters, conditional writes, batches and TTL queries.
///
/// Counters are stored as decimal ASCII. A missing counter starts from zero
/// and never expires; an existing counter keeps its expiry.
#[async_trait]
pub trait CounterCapableBackend: CacheBackend {
    async fn increment(&self, ctx: &CacheContext, key: &str, delta: i64) -> Result<i64>;

    async fn decrement(&self, ctx: &CacheContext, key: &str, delta: i64) -> Result<i64> {
        self.increment(ctx, key, -delta).await
    }

    /// Writes only if the key is absent (or expired). Returns whether it wrote.
    async fn set_if_absent(
        &self,
        ctx: &CacheContext,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool>;

    /// Returns the entries that exist, keyed by logical key.
    async fn get_many(&self, ctx: &CacheContext, keys: &[String])
        -> Result<HashMap<String, Vec<u8>>>;

    async fn set_many(
        &self,
        ctx: &CacheContext,
        entries: HashMap<String, Vec<u8>>,
        ttl: Duration,
    ) -> Result<()>;

    /// Remaining lifetime. `None` if the key never expires; `NotFound` if absent.
    async fn ttl(&self, ctx: &CacheContext, key: &str) -> Result<Option<Duration>>;
}
