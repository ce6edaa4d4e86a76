//! Configuration Module
//!
//! Loads server and cache configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::{CacheOptions, RemoteConfig, DEFAULT_SWEEP_INTERVAL};
use crate::error::{CacheError, Result};

// == Backend Kind ==
/// Which engine backs the primary cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Remote,
}

impl FromStr for BackendKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "memory" => Ok(BackendKind::Local),
            "remote" | "redis" => Ok(BackendKind::Remote),
            other => Err(CacheError::InvalidConfiguration(format!(
                "unknown cache type '{}'",
                other
            ))),
        }
    }
}

// == Cache Config ==
/// Settings for the primary backend.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub kind: BackendKind,
    /// Redis endpoint, required when `kind` is `Remote`
    pub redis_addr: Option<String>,
    pub redis_password: Option<String>,
    pub redis_db: i64,
    /// Default TTL in seconds
    pub default_ttl: u64,
    /// Advisory entry limit
    pub max_size: usize,
    pub key_prefix: String,
    /// Local sweeper interval in seconds
    pub sweep_interval: u64,
}

impl CacheConfig {
    pub fn options(&self) -> CacheOptions {
        CacheOptions::new(
            Duration::from_secs(self.default_ttl),
            self.max_size,
            self.key_prefix.clone(),
        )
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval)
    }

    /// Remote connection settings.
    ///
    /// # Errors
    /// `InvalidConfiguration` when no Redis address is configured.
    pub fn remote(&self) -> Result<RemoteConfig> {
        let addr = self
            .redis_addr
            .clone()
            .filter(|addr| !addr.trim().is_empty())
            .ok_or_else(|| {
                CacheError::InvalidConfiguration("REDIS_ADDR is required for a remote cache".into())
            })?;

        Ok(RemoteConfig {
            addr,
            password: self.redis_password.clone(),
            db: self.redis_db,
            ..RemoteConfig::default()
        })
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Local,
            redis_addr: None,
            redis_password: None,
            redis_db: 0,
            default_ttl: 300,
            max_size: 1000,
            key_prefix: "cache:".to_string(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL.as_secs(),
        }
    }
}

// == Config ==
/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    pub cache: CacheConfig,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_TYPE` - `local`/`memory` or `remote`/`redis` (default: local)
    /// - `REDIS_ADDR` - Redis endpoint, `host:port` or URL
    /// - `REDIS_PASS` - Redis password
    /// - `REDIS_DB` - Redis database index (default: 0)
    /// - `CACHE_DEFAULT_TTL` - Default TTL in seconds (default: 300)
    /// - `CACHE_MAX_SIZE` - Advisory entry limit (default: 1000)
    /// - `CACHE_PREFIX` - Key prefix (default: "cache:")
    /// - `CACHE_SWEEP_INTERVAL` - Sweeper frequency in seconds (default: 60)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    ///
    /// # Errors
    /// `InvalidConfiguration` for an unknown `CACHE_TYPE`.
    pub fn from_env() -> Result<Self> {
        let defaults = CacheConfig::default();

        let kind = match env::var("CACHE_TYPE") {
            Ok(value) if !value.trim().is_empty() => value.parse()?,
            _ => defaults.kind,
        };

        Ok(Self {
            server_port: parsed("SERVER_PORT").unwrap_or(3000),
            cache: CacheConfig {
                kind,
                redis_addr: env::var("REDIS_ADDR").ok(),
                redis_password: env::var("REDIS_PASS").ok().filter(|p| !p.is_empty()),
                redis_db: parsed("REDIS_DB").unwrap_or(defaults.redis_db),
                default_ttl: parsed("CACHE_DEFAULT_TTL").unwrap_or(defaults.default_ttl),
                max_size: parsed("CACHE_MAX_SIZE").unwrap_or(defaults.max_size),
                key_prefix: env::var("CACHE_PREFIX").unwrap_or(defaults.key_prefix),
                sweep_interval: parsed("CACHE_SWEEP_INTERVAL")
                    .filter(|secs| *secs > 0)
                    .unwrap_or(defaults.sweep_interval),
            },
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            cache: CacheConfig::default(),
        }
    }
}

fn parsed<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}
