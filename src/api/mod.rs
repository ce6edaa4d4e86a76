//! API Module
//!
//! HTTP handlers and routing for the cache management REST API.
//!
//! # Endpoints
//! - `GET /cache/stats` - Backend statistics
//! - `POST /cache/flush` - Remove every cached key
//! - `POST /cache/invalidate` - Remove keys matching a glob pattern
//! - `POST /cache/set` - Store a JSON value
//! - `GET /cache/:key` - Retrieve a JSON value
//! - `DELETE /cache/:key` - Delete a key
//! - `GET /health` - Liveness check
//! - `GET /health/cache` - Cache backend health probe

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
