//! Request fingerprinting for the response cache.

use axum::extract::Request;
use axum::http::HeaderName;
use sha2::{Digest, Sha256};

use crate::middleware::AuthenticatedUser;

/// Derives the cache key for a request.
///
/// Hashes the method, path, query, the values of `vary_headers` and the
/// [`AuthenticatedUser`] extension. Headers outside `vary_headers` do not
/// contribute, so requests differing only in those share an entry.
///
/// # Returns
/// `prefix` followed by the hex SHA-256 digest.
pub fn fingerprint(prefix: &str, request: &Request, vary_headers: &[HeaderName]) -> String {
    let mut hasher = Sha256::new();

    hash_field(&mut hasher, b'M', request.method().as_str().as_bytes());
    hash_field(&mut hasher, b'P', request.uri().path().as_bytes());

    if let Some(query) = request.uri().query() {
        hash_field(&mut hasher, b'Q', query.as_bytes());
    }

    for name in vary_headers {
        for value in request.headers().get_all(name) {
            hash_field(&mut hasher, b'H', name.as_str().as_bytes());
            hash_field(&mut hasher, b'V', value.as_bytes());
        }
    }

    if let Some(AuthenticatedUser(id)) = request.extensions().get::<AuthenticatedUser>() {
        hash_field(&mut hasher, b'U', id.as_bytes());
    }

    format!("{}{}", prefix, hex::encode(hasher.finalize()))
}

/// Feeds one tagged, length-prefixed field so no value can spill into the next.
fn hash_field(hasher: &mut Sha256, tag: u8, bytes: &[u8]) {
    hasher.update([tag]);
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}
