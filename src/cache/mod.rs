//! Cache Module
//!
//! Pluggable cache backends with TTL expiration, plus the layers built on
//! them: JSON helper, domain service, named registry and health probe.

mod backend;
pub mod entry;
mod factory;
mod health;
mod helper;
mod local;
mod manager;
pub mod pattern;
mod remote;
pub mod service;
mod stats;


// Re-export public types
pub use backend::{BackendStats, CacheBackend, CacheOptions, CounterCapableBackend};
pub use entry::CacheEntry;
pub use factory::{build_backend, build_manager, FALLBACK_CACHE, PRIMARY_CACHE};
pub use health::{HealthChecker, HealthReport};
pub use helper::CacheHelper;
pub use local::{LocalBackend, DEFAULT_SWEEP_INTERVAL, MIN_SWEEP_INTERVAL};
pub use manager::CacheManager;
pub use remote::{RemoteBackend, RemoteConfig};
pub use service::{CacheService, TtlPolicy};
pub use stats::{CacheStats, StatsCounters};
