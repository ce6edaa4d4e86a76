//! Remote Backend Module
//!
//! Redis-protocol cache engine. Each instance owns its connection manager;
//! every command is a network round trip bound to the caller's context.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{FromRedisValue, IntoConnectionInfo};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::cache::pattern::{escape_glob, prefixed_key};
use crate::cache::{
    BackendStats, CacheBackend, CacheOptions, CounterCapableBackend, StatsCounters,
};
use crate::context::CacheContext;
use crate::error::{CacheError, Result};

/// Keys requested per SCAN round trip
const SCAN_BATCH: usize = 1000;
/// Keys removed per DEL round trip
const DELETE_BATCH: usize = 500;

// == Remote Config ==
/// Connection parameters for the remote backend.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// `host:port`, or a full `redis://` / `rediss://` URL
    pub addr: String,
    pub password: Option<String>,
    pub db: i64,
    /// Bound on connect + PING at construction
    pub connect_timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            addr: String::new(),
            password: None,
            db: 0,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl RemoteConfig {
    /// Builds the redis client, rejecting missing parameters.
    fn client(&self) -> Result<redis::Client> {
        let addr = self.addr.trim();
        if addr.is_empty() {
            return Err(CacheError::InvalidConfiguration(
                "remote backend address is required".to_string(),
            ));
        }

        let url = if addr.starts_with("redis://") || addr.starts_with("rediss://") {
            addr.to_string()
        } else {
            format!("redis://{}", addr)
        };

        let mut info = url
            .into_connection_info()
            .map_err(|e| CacheError::InvalidConfiguration(e.to_string()))?;
        info.redis.db = self.db;
        if let Some(password) = self.password.as_ref().filter(|p| !p.is_empty()) {
            info.redis.password = Some(password.clone());
        }

        redis::Client::open(info).map_err(|e| CacheError::InvalidConfiguration(e.to_string()))
    }
}

// == Remote Backend ==
/// Cache backend backed by a shared Redis-compatible server.
pub struct RemoteBackend {
    /// None once closed
    connection: RwLock<Option<ConnectionManager>>,
    options: CacheOptions,
    endpoint: String,
    db: i64,
    stats: StatsCounters,
}

impl RemoteBackend {
    // == Constructor ==
    /// Connects and verifies the server answers PING.
    ///
    /// Fails with `InvalidConfiguration` for missing parameters and with
    /// `Transport` when the server cannot be reached within
    /// `connect_timeout`. A backend that cannot connect is never returned.
    pub async fn connect(config: &RemoteConfig, options: CacheOptions) -> Result<Self> {
        let client = config.client()?;

        let handshake = async {
            let mut manager = ConnectionManager::new(client).await?;
            let _pong: String = redis::cmd("PING").query_async(&mut manager).await?;
            Ok::<_, CacheError>(manager)
        };

        let manager = tokio::time::timeout(config.connect_timeout, handshake)
            .await
            .map_err(|_| {
                CacheError::Transport(format!(
                    "timed out after {:?} connecting to {}",
                    config.connect_timeout, config.addr
                ))
            })??;

        info!(endpoint = %config.addr, db = config.db, "Remote cache backend connected");

        Ok(Self {
            connection: RwLock::new(Some(manager)),
            options,
            endpoint: config.addr.clone(),
            db: config.db,
            stats: StatsCounters::new(),
        })
    }

    fn full_key(&self, key: &str) -> String {
        prefixed_key(&self.options.key_prefix, key)
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        self.connection.read().await.clone().ok_or(CacheError::Closed)
    }

    /// Runs one command under the context.
    async fn query<T>(&self, ctx: &CacheContext, cmd: redis::Cmd) -> Result<T>
    where
        T: FromRedisValue + Send,
    {
        let mut conn = self.connection().await?;
        ctx.run(async move { Ok::<_, CacheError>(cmd.query_async::<_, T>(&mut conn).await?) })
            .await
    }

    /// Lists full keys matching a server-side glob.
    async fn scan_keys(&self, ctx: &CacheContext, pattern: String) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        ctx.run(async move {
            let mut cursor: u64 = 0;
            let mut keys = Vec::new();
            loop {
                let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .query_async(&mut conn)
                    .await?;
                keys.extend(batch);
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            Ok::<_, CacheError>(keys)
        })
        .await
    }

    /// Deletes full keys in batches. Not atomic with concurrent writers.
    async fn delete_keys(&self, ctx: &CacheContext, keys: Vec<String>) -> Result<usize> {
        let mut removed = 0usize;
        for chunk in keys.chunks(DELETE_BATCH) {
            let mut cmd = redis::cmd("DEL");
            for key in chunk {
                cmd.arg(key);
            }
            let count: i64 = self.query(ctx, cmd).await?;
            removed += count.max(0) as usize;
        }
        self.stats.record_deletes(removed as u64);
        Ok(removed)
    }

    /// Glob over this backend's namespace.
    fn namespaced_pattern(&self, pattern: &str) -> String {
        format!("{}{}", escape_glob(&self.options.key_prefix), pattern)
    }

    fn expiry_millis(&self, ttl: Duration) -> Option<u64> {
        self.options.effective_ttl(ttl).map(ttl_millis)
    }
}

/// Millisecond TTL for `PX`, never below 1.
fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl CacheBackend for RemoteBackend {
    fn kind(&self) -> &'static str {
        "remote"
    }

    fn options(&self) -> &CacheOptions {
        &self.options
    }

    // == Get ==
    async fn get(&self, ctx: &CacheContext, key: &str) -> Result<Vec<u8>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(self.full_key(key));

        match self.query::<Option<Vec<u8>>>(ctx, cmd).await? {
            Some(value) => {
                self.stats.record_hit();
                debug!("Remote cache hit for key: {}", key);
                Ok(value)
            }
            None => {
                self.stats.record_miss();
                debug!("Remote cache miss for key: {}", key);
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
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.full_key(key)).arg(value);
        if let Some(ms) = self.expiry_millis(ttl) {
            cmd.arg("PX").arg(ms);
        }

        self.query::<()>(ctx, cmd).await?;
        self.stats.record_set();
        Ok(())
    }

    async fn delete(&self, ctx: &CacheContext, key: &str) -> Result<()> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(self.full_key(key));

        let removed: i64 = self.query(ctx, cmd).await?;
        self.stats.record_deletes(removed.max(0) as u64);
        Ok(())
    }

    async fn exists(&self, ctx: &CacheContext, key: &str) -> Result<bool> {
        let mut cmd = redis::cmd("EXISTS");
        cmd.arg(self.full_key(key));

        let count: i64 = self.query(ctx, cmd).await?;
        Ok(count > 0)
    }

    async fn flush(&self, ctx: &CacheContext) -> Result<()> {
        let keys = self.scan_keys(ctx, self.namespaced_pattern("*")).await?;
        let removed = self.delete_keys(ctx, keys).await?;
        info!("Remote cache flushed: removed {} keys", removed);
        Ok(())
    }

    async fn invalidate_pattern(&self, ctx: &CacheContext, pattern: &str) -> Result<usize> {
        let keys = self.scan_keys(ctx, self.namespaced_pattern(pattern)).await?;
        let removed = self.delete_keys(ctx, keys).await?;
        debug!(pattern, removed, "Remote cache pattern invalidated");
        Ok(removed)
    }

    // == Close ==
    async fn close(&self) -> Result<()> {
        if self.connection.write().await.take().is_some() {
            info!(endpoint = %self.endpoint, "Remote cache backend closed");
        }
        Ok(())
    }

    async fn stats(&self, ctx: &CacheContext) -> Result<BackendStats> {
        let keys = self.scan_keys(ctx, self.namespaced_pattern("*")).await?;
        let counters = self.stats.snapshot();
        Ok(BackendStats::Remote {
            endpoint: self.endpoint.clone(),
            database: self.db,
            key_prefix: self.options.key_prefix.clone(),
            keys: keys.len(),
            hit_rate: counters.hit_rate(),
            counters,
        })
    }

    fn counters(&self) -> Option<&dyn CounterCapableBackend> {
        Some(self)
    }
}

#[async_trait]
impl CounterCapableBackend for RemoteBackend {
    async fn increment(&self, ctx: &CacheContext, key: &str, delta: i64) -> Result<i64> {
        let mut cmd = redis::cmd("INCRBY");
        cmd.arg(self.full_key(key)).arg(delta);
        self.query(ctx, cmd).await
    }

    async fn decrement(&self, ctx: &CacheContext, key: &str, delta: i64) -> Result<i64> {
        let mut cmd = redis::cmd("DECRBY");
        cmd.arg(self.full_key(key)).arg(delta);
        self.query(ctx, cmd).await
    }

    async fn set_if_absent(
        &self,
        ctx: &CacheContext,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.full_key(key)).arg(value).arg("NX");
        if let Some(ms) = self.expiry_millis(ttl) {
            cmd.arg("PX").arg(ms);
        }

        let reply: Option<String> = self.query(ctx, cmd).await?;
        if reply.is_some() {
            self.stats.record_set();
        }
        Ok(reply.is_some())
    }

    async fn get_many(
        &self,
        ctx: &CacheContext,
        keys: &[String],
    ) -> Result<HashMap<String, Vec<u8>>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let mut cmd = redis::cmd("MGET");
        for key in keys {
            cmd.arg(self.full_key(key));
        }

        let values: Vec<Option<Vec<u8>>> = self.query(ctx, cmd).await?;
        let mut found = HashMap::with_capacity(keys.len());
        for (key, value) in keys.iter().zip(values) {
            match value {
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
        if entries.is_empty() {
            return Ok(());
        }

        let count = entries.len() as u64;
        let expiry = self.expiry_millis(ttl);
        let mut pipe = redis::pipe();
        for (key, value) in entries {
            pipe.cmd("SET").arg(self.full_key(&key)).arg(value);
            if let Some(ms) = expiry {
                pipe.arg("PX").arg(ms);
            }
            pipe.ignore();
        }

        let mut conn = self.connection().await?;
        ctx.run(async move { Ok::<_, CacheError>(pipe.query_async::<_, ()>(&mut conn).await?) })
            .await?;
        for _ in 0..count {
            self.stats.record_set();
        }
        Ok(())
    }

    async fn ttl(&self, ctx: &CacheContext, key: &str) -> Result<Option<Duration>> {
        let mut cmd = redis::cmd("PTTL");
        cmd.arg(self.full_key(key));

        match self.query::<i64>(ctx, cmd).await? {
            -2 => Err(CacheError::NotFound(key.to_string())),
            -1 => Ok(None),
            ms => Ok(Some(Duration::from_millis(ms.max(0) as u64))),
        }
    }
}
