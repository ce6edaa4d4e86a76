//! Cache Kit - pluggable caching for async Rust services
//!
//! Interchangeable in-process and Redis-backed cache engines behind one
//! contract, a JSON get-or-set helper, a domain cache service, a named
//! backend registry, HTTP response-caching middlewares and a health probe.

pub mod api;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod middleware;
pub mod models;
pub mod tasks;

pub use api::AppState;
pub use cache::{CacheBackend, CacheManager, CacheOptions, LocalBackend, RemoteBackend};
pub use config::Config;
pub use context::CacheContext;
pub use error::{CacheError, Result};
