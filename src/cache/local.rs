//! Local Backend Module
//!
//! In-process cache engine: a sharded concurrent map with lazy expiry on read
//! and a background sweeper for keys that are never read again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::pattern::{glob_match, prefixed_key};
use crate::cache::{
    BackendStats, CacheBackend, CacheEntry, CacheOptions, CounterCapableBackend, StatsCounters,
};
use crate::context::CacheContext;
use crate::error::{CacheError, Result};
use crate::tasks::spawn_sweeper;

/// Default time between sweeper passes.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Shortest accepted time between sweeper passes.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

// == Local Backend ==
/// Concurrent in-memory backend.
///
/// Safe to share across tasks and threads without external locking. Must be
/// constructed inside a tokio runtime, since construction spawns the sweeper.
pub struct LocalBackend {
    /// Prefixed key -> entry
    entries: Arc<DashMap<String, CacheEntry>>,
    options: CacheOptions,
    stats: Arc<StatsCounters>,
    closed: AtomicBool,
    /// Cancelled on close or drop to stop the sweeper
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    sweep_interval: Duration,
}

impl LocalBackend {
    // == Constructor ==
    /// Creates a local backend sweeping every [`DEFAULT_SWEEP_INTERVAL`].
    pub fn new(options: CacheOptions) -> Self {
        Self::with_sweep_interval(options, DEFAULT_SWEEP_INTERVAL)
    }

    /// Creates a local backend with a custom sweep interval.
    ///
    /// Intervals shorter than [`MIN_SWEEP_INTERVAL`], zero included, are
    /// raised to it.
    pub fn with_sweep_interval(options: CacheOptions, sweep_interval: Duration) -> Self {
        let sweep_interval = sweep_interval.max(MIN_SWEEP_INTERVAL);
        let entries = Arc::new(DashMap::new());
        let stats = Arc::new(StatsCounters::new());
        let shutdown = CancellationToken::new();
        let handle = spawn_sweeper(
            entries.clone(),
            stats.clone(),
            sweep_interval,
            shutdown.clone(),
        );

        debug!(prefix = %options.key_prefix, "Local cache backend created");

        Self {
            entries,
            options,
            stats,
            closed: AtomicBool::new(false),
            shutdown,
            sweeper: Mutex::new(Some(handle)),
            sweep_interval,
        }
    }

    /// Time between sweeper passes.
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    // == Length ==
    /// Number of stored entries, including expired ones not yet reclaimed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Logical (unprefixed) keys currently stored.
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter_map(|item| {
                item.key()
                    .strip_prefix(self.options.key_prefix.as_str())
                    .map(str::to_string)
            })
            .collect()
    }

    fn full_key(&self, key: &str) -> String {
        prefixed_key(&self.options.key_prefix, key)
    }

    fn ensure_open(&self, ctx: &CacheContext) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        ctx.check()
    }

    /// Returns the value if present and live; removes it if found expired.
    fn read_live(&self, full_key: &str) -> Option<Vec<u8>> {
        let expired = match self.entries.get(full_key) {
            Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };

        // Guard dropped above; removing while holding it would deadlock the shard.
        if expired
            && self
                .entries
                .remove_if(full_key, |_, entry| entry.is_expired())
                .is_some()
        {
            self.stats.record_expired(1);
        }
        None
    }

    /// Removes every stored key whose logical name satisfies `predicate`.
    fn remove_matching<F>(&self, predicate: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let prefix = self.options.key_prefix.as_str();
        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|item| {
                item.key()
                    .strip_prefix(prefix)
                    .is_some_and(|logical| predicate(logical))
            })
            .map(|item| item.key().clone())
            .collect();

        let removed = doomed
            .iter()
            .filter(|key| self.entries.remove(key.as_str()).is_some())
            .count();
        self.stats.record_deletes(removed as u64);
        removed
    }

    fn new_entry(&self, value: Vec<u8>, ttl: Duration) -> CacheEntry {
        CacheEntry::new(value, self.options.effective_ttl(ttl))
    }
}

impl Drop for LocalBackend {
    fn drop(&mut self) {
        // Backends dropped without close() must not leave the sweeper holding the map
        self.shutdown.cancel();
    }
}

#[async_trait]
impl CacheBackend for LocalBackend {
    fn kind(&self) -> &'static str {
        "local"
    }

    fn options(&self) -> &CacheOptions {
        &self.options
    }

    // == Get ==
    async fn get(&self, ctx: &CacheContext, key: &str) -> Result<Vec<u8>> {
        self.ensure_open(ctx)?;

        match self.read_live(&self.full_key(key)) {
            Some(value) => {
                self.stats.record_hit();
                Ok(value)
            }
            None => {
                self.stats.record_miss();
                Err(CacheError::NotFound(key.to_string()))
            }
        }
    }

    // == Set ==
    async fn set(
        &self,
        ctx: &CacheContext,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<()> {
        self.ensure_open(ctx)?;

        let entry = self.new_entry(value, ttl);
        self.entries.insert(self.full_key(key), entry);
        self.stats.record_set();

        if self.entries.len() > self.options.max_size {
            debug!(
                entries = self.entries.len(),
                max_size = self.options.max_size,
                "Local cache above advisory max size"
            );
        }
        Ok(())
    }

    // == Delete ==
    async fn delete(&self, ctx: &CacheContext, key: &str) -> Result<()> {
        self.ensure_open(ctx)?;

        if self.entries.remove(&self.full_key(key)).is_some() {
            self.stats.record_deletes(1);
        }
        Ok(())
    }

    async fn exists(&self, ctx: &CacheContext, key: &str) -> Result<bool> {
        self.ensure_open(ctx)?;
        Ok(self.read_live(&self.full_key(key)).is_some())
    }

    async fn flush(&self, ctx: &CacheContext) -> Result<()> {
        self.ensure_open(ctx)?;
        let removed = self.remove_matching(|_| true);
        info!("Local cache flushed: removed {} entries", removed);
        Ok(())
    }

    async fn invalidate_pattern(&self, ctx: &CacheContext, pattern: &str) -> Result<usize> {
        self.ensure_open(ctx)?;
        let removed = self.remove_matching(|logical| glob_match(pattern, logical));
        debug!(pattern, removed, "Local cache pattern invalidated");
        Ok(removed)
    }

    // == Close ==
    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.shutdown.cancel();
        if let Some(handle) = self.sweeper.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("Local cache sweeper ended abnormally: {}", e);
            }
        }
        self.entries.clear();

        info!(prefix = %self.options.key_prefix, "Local cache backend closed");
        Ok(())
    }

    async fn stats(&self, ctx: &CacheContext) -> Result<BackendStats> {
        self.ensure_open(ctx)?;
        let counters = self.stats.snapshot();
        Ok(BackendStats::Local {
            entries: self.entries.len(),
            max_size: self.options.max_size,
            key_prefix: self.options.key_prefix.clone(),
            hit_rate: counters.hit_rate(),
            counters,
        })
    }

    fn counters(&self) -> Option<&dyn CounterCapableBackend> {
        Some(self)
    }
}

#[async_trait]
impl CounterCapableBackend for LocalBackend {
    async fn increment(&self, ctx: &CacheContext, key: &str, delta: i64) -> Result<i64> {
        self.ensure_open(ctx)?;

        let mut slot = self
            .entries
            .entry(self.full_key(key))
            .or_insert_with(|| CacheEntry::new(b"0".to_vec(), None));
        if slot.is_expired() {
            *slot = CacheEntry::new(b"0".to_vec(), None);
        }

        let current: i64 = std::str::from_utf8(&slot.value)
            .ok()
            .and_then(|text| text.parse().ok())
            .ok_or_else(|| {
                CacheError::InvalidRequest(format!("value at '{}' is not an integer", key))
            })?;
        let next = current.checked_add(delta).ok_or_else(|| {
            CacheError::InvalidRequest(format!("increment of '{}' would overflow", key))
        })?;

        slot.value = next.to_string().into_bytes();
        Ok(next)
    }

    async fn set_if_absent(
        &self,
        ctx: &CacheContext,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool> {
        self.ensure_open(ctx)?;

        let entry = self.new_entry(value, ttl);
        let written = match self.entries.entry(self.full_key(key)) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(entry);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                true
            }
        };

        if written {
            self.stats.record_set();
        }
        Ok(written)
    }

    async fn get_many(
        &self,
        ctx: &CacheContext,
        keys: &[String],
    ) -> Result<HashMap<String, Vec<u8>>> {
        self.ensure_open(ctx)?;

        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            match self.read_live(&self.full_key(key)) {
                Some(value) => {
                    self.stats.record_hit();
                    found.insert(key.clone(), value);
                }
                None => self.stats.record_miss(),
            }
        }
        Ok(found)
    }

    async fn set_many(
        &self,
        ctx: &CacheContext,
        entries: HashMap<String, Vec<u8>>,
        ttl: Duration,
    ) -> Result<()> {
        self.ensure_open(ctx)?;

        for (key, value) in entries {
            let entry = self.new_entry(value, ttl);
            self.entries.insert(self.full_key(&key), entry);
            self.stats.record_set();
        }
        Ok(())
    }

    async fn ttl(&self, ctx: &CacheContext, key: &str) -> Result<Option<Duration>> {
        self.ensure_open(ctx)?;

        match self.entries.get(&self.full_key(key)) {
            Some(entry) if !entry.is_expired() => Ok(entry.ttl_remaining()),
            _ => Err(CacheError::NotFound(key.to_string())),
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> LocalBackend {
        LocalBackend::new(CacheOptions::default())
    }

    fn ctx() -> CacheContext {
        CacheContext::background()
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = backend();
        cache
            .set(&ctx(), "key1", b"value1".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(cache.get(&ctx(), "key1").await.unwrap(), b"value1");
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let cache = backend();
        let result = cache.get(&ctx(), "missing").await;
        assert!(matches!(result, Err(CacheError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_keys_are_prefixed() {
        let cache = LocalBackend::new(CacheOptions::new(Duration::from_secs(60), 10, "app:"));
        cache
            .set(&ctx(), "user:1", b"a".to_vec(), Duration::ZERO)
            .await
            .unwrap();

        assert!(cache.entries.contains_key("app:user:1"));
        assert_eq!(cache.keys(), vec!["user:1".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let cache = backend();
        cache
            .set(&ctx(), "key1", b"v".to_vec(), Duration::ZERO)
            .await
            .unwrap();

        cache.delete(&ctx(), "key1").await.unwrap();
        cache.delete(&ctx(), "key1").await.unwrap();

        assert!(matches!(
            cache.get(&ctx(), "key1").await,
            Err(CacheError::NotFound(_))
        ));
        assert!(!cache.exists(&ctx(), "key1").await.unwrap());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_value() {
        let cache = backend();
        cache
            .set(&ctx(), "k", b"one".to_vec(), Duration::ZERO)
            .await
            .unwrap();
        cache
            .set(&ctx(), "k", b"two".to_vec(), Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(cache.get(&ctx(), "k").await.unwrap(), b"two");
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_ttl_expiration_is_lazy() {
        let cache = backend();
        cache
            .set(&ctx(), "short", b"v".to_vec(), Duration::from_millis(1))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        // Still physically present until first access
        assert_eq!(cache.len(), 1);
        assert!(!cache.exists(&ctx(), "short").await.unwrap());
        assert_eq!(cache.len(), 0);
        assert!(matches!(
            cache.get(&ctx(), "short").await,
            Err(CacheError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_ttl_uses_default() {
        let cache = LocalBackend::new(CacheOptions::new(Duration::from_millis(5), 10, "c:"));
        cache
            .set(&ctx(), "k", b"v".to_vec(), Duration::ZERO)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get(&ctx(), "k").await.is_err());
    }

    #[tokio::test]
    async fn test_zero_default_never_expires() {
        let cache = LocalBackend::new(CacheOptions::new(Duration::ZERO, 10, "c:"));
        cache
            .set(&ctx(), "k", b"v".to_vec(), Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(cache.ttl(&ctx(), "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalidate_pattern() {
        let cache = backend();
        for key in ["user:1", "user:2", "product:1"] {
            cache
                .set(&ctx(), key, b"v".to_vec(), Duration::ZERO)
                .await
                .unwrap();
        }

        let removed = cache.invalidate_pattern(&ctx(), "user:*").await.unwrap();

        assert_eq!(removed, 2);
        assert!(!cache.exists(&ctx(), "user:1").await.unwrap());
        assert!(!cache.exists(&ctx(), "user:2").await.unwrap());
        assert!(cache.exists(&ctx(), "product:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_flush() {
        let cache = backend();
        cache
            .set(&ctx(), "a", b"1".to_vec(), Duration::ZERO)
            .await
            .unwrap();
        cache
            .set(&ctx(), "b", b"2".to_vec(), Duration::ZERO)
            .await
            .unwrap();

        cache.flush(&ctx()).await.unwrap();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_operations_after_close_fail() {
        let cache = backend();
        cache.close().await.unwrap();
        cache.close().await.unwrap();

        assert!(matches!(
            cache.get(&ctx(), "k").await,
            Err(CacheError::Closed)
        ));
        assert!(matches!(
            cache.set(&ctx(), "k", b"v".to_vec(), Duration::ZERO).await,
            Err(CacheError::Closed)
        ));
        assert!(cache.sweeper.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_context_rejected() {
        let cache = backend();
        let ctx = CacheContext::background();
        ctx.cancel();

        assert!(matches!(
            cache.get(&ctx, "k").await,
            Err(CacheError::Canceled)
        ));
    }

    #[tokio::test]
    async fn test_sweeper_reclaims_unread_keys() {
        let cache =
            LocalBackend::with_sweep_interval(CacheOptions::default(), Duration::from_millis(20));
        cache
            .set(&ctx(), "forgotten", b"v".to_vec(), Duration::from_millis(1))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(cache.is_empty());
        let stats = cache.stats(&ctx()).await.unwrap();
        assert_eq!(stats.counters().expired, 1);
    }

    #[tokio::test]
    async fn test_drop_stops_sweeper_and_releases_map() {
        let cache =
            LocalBackend::with_sweep_interval(CacheOptions::default(), Duration::from_millis(10));
        cache
            .set(&ctx(), "k", b"v".to_vec(), Duration::ZERO)
            .await
            .unwrap();
        let entries = Arc::downgrade(&cache.entries);

        drop(cache);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(entries.upgrade().is_none());
    }

    #[tokio::test]
    async fn test_zero_sweep_interval_is_clamped() {
        let cache = LocalBackend::with_sweep_interval(CacheOptions::default(), Duration::ZERO);
        assert_eq!(cache.sweep_interval(), MIN_SWEEP_INTERVAL);

        let cache =
            LocalBackend::with_sweep_interval(CacheOptions::default(), Duration::from_secs(5));
        assert_eq!(cache.sweep_interval(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_stats_counts_hits_and_misses() {
        let cache = backend();
        cache
            .set(&ctx(), "k", b"v".to_vec(), Duration::ZERO)
            .await
            .unwrap();
        cache.get(&ctx(), "k").await.unwrap();
        let _ = cache.get(&ctx(), "nope").await;

        match cache.stats(&ctx()).await.unwrap() {
            BackendStats::Local {
                entries, counters, ..
            } => {
                assert_eq!(entries, 1);
                assert_eq!(counters.hits, 1);
                assert_eq!(counters.misses, 1);
                assert_eq!(counters.sets, 1);
            }
            other => panic!("unexpected stats: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_increment_and_decrement() {
        let cache = backend();
        let counters = cache.counters().unwrap();

        assert_eq!(counters.increment(&ctx(), "hits", 5).await.unwrap(), 5);
        assert_eq!(counters.increment(&ctx(), "hits", 2).await.unwrap(), 7);
        assert_eq!(counters.decrement(&ctx(), "hits", 3).await.unwrap(), 4);
        assert_eq!(cache.get(&ctx(), "hits").await.unwrap(), b"4");
    }

    #[tokio::test]
    async fn test_increment_non_integer_fails() {
        let cache = backend();
        cache
            .set(&ctx(), "text", b"abc".to_vec(), Duration::ZERO)
            .await
            .unwrap();

        let result = cache.increment(&ctx(), "text", 1).await;
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_set_if_absent() {
        let cache = backend();
        assert!(cache
            .set_if_absent(&ctx(), "lock", b"a".to_vec(), Duration::from_secs(10))
            .await
            .unwrap());
        assert!(!cache
            .set_if_absent(&ctx(), "lock", b"b".to_vec(), Duration::from_secs(10))
            .await
            .unwrap());
        assert_eq!(cache.get(&ctx(), "lock").await.unwrap(), b"a");
    }

    #[tokio::test]
    async fn test_set_if_absent_replaces_expired() {
        let cache = backend();
        cache
            .set(&ctx(), "lock", b"old".to_vec(), Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(cache
            .set_if_absent(&ctx(), "lock", b"new".to_vec(), Duration::ZERO)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_get_many_and_set_many() {
        let cache = backend();
        let batch = HashMap::from([
            ("a".to_string(), b"1".to_vec()),
            ("b".to_string(), b"2".to_vec()),
        ]);
        cache
            .set_many(&ctx(), batch, Duration::from_secs(60))
            .await
            .unwrap();

        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let found = cache.get_many(&ctx(), &keys).await.unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found["a"], b"1");
        assert!(!found.contains_key("c"));
    }

    #[tokio::test]
    async fn test_ttl_query() {
        let cache = backend();
        cache
            .set(&ctx(), "k", b"v".to_vec(), Duration::from_secs(30))
            .await
            .unwrap();

        let remaining = cache.ttl(&ctx(), "k").await.unwrap().unwrap();
        assert!(remaining <= Duration::from_secs(30));
        assert!(remaining > Duration::from_secs(28));
        assert!(matches!(
            cache.ttl(&ctx(), "absent").await,
            Err(CacheError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_access() {
        let cache = Arc::new(backend());
        let mut handles = Vec::new();

        for task in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                let ctx = CacheContext::background();
                for i in 0..200 {
                    let key = format!("k{}", i % 50);
                    let value = format!("{}-{}", task, i).into_bytes();
                    cache.set(&ctx, &key, value, Duration::ZERO).await.unwrap();
                    let _ = cache.get(&ctx, &key).await;
                    if i % 7 == 0 {
                        cache.delete(&ctx, &key).await.unwrap();
                    }
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert!(cache.len() <= 50);
    }
}
