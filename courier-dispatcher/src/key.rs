//! Cache-key derivation.
//!
//! A request is identified by `queue_name/<digest>` where the digest is the
//! base58-encoded SHA-384 of the request path and query. The host never enters
//! the digest: host aliasing is canonicalized through the queue name, so two
//! aliases of the same host map to the same key on purpose.

use sha2::{Digest, Sha384};

/// Derive the cache key for a request.
///
/// `path` and `query` must be passed exactly as received: the digest is over
/// their raw concatenation with no separator, so two requests collide iff the
/// concatenation is byte-identical.
pub fn cache_key(queue_name: &str, path: &str, query: &str) -> String {
    let mut hasher = Sha384::new();
    hasher.update(path.as_bytes());
    hasher.update(query.as_bytes());
    let digest = hasher.finalize();
    format!("{}/{}", queue_name, bs58::encode(digest).into_string())
}
