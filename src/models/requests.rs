//! Request DTOs for the cache management API
//!
//! Defines the structure of incoming HTTP request bodies.

use serde::Deserialize;

/// Keys longer than this are rejected by the management API.
pub const MAX_KEY_LENGTH: usize = 256;

/// Request body for POST /cache/set
///
/// # Fields
/// - `key`: Logical cache key
/// - `value`: Any JSON value
/// - `ttl`: Optional TTL in seconds (backend default if absent or zero)
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    pub key: String,
    pub value: serde_json::Value,
    #[serde(default)]
    pub ttl: Option<u64>,
}

impl SetRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        validate_key(&self.key)
    }
}

/// Request body for POST /cache/invalidate
#[derive(Debug, Clone, Deserialize)]
pub struct InvalidateRequest {
    /// Glob over logical keys, e.g. `users:*`
    pub pattern: String,
}

impl InvalidateRequest {
    pub fn validate(&self) -> Option<String> {
        if self.pattern.trim().is_empty() {
            return Some("Pattern cannot be empty".to_string());
        }
        None
    }
}

/// Shared key validation for the management API.
pub fn validate_key(key: &str) -> Option<String> {
    if key.is_empty() {
        return Some("Key cannot be empty".to_string());
    }
    if key.len() > MAX_KEY_LENGTH {
        return Some(format!(
            "Key exceeds maximum length of {} characters",
            MAX_KEY_LENGTH
        ));
    }
    None
}
