//! HTTP route handlers for the dispatcher.
//!
//! This module organizes all route handlers:
//! - `enqueue`: POST /, the cache-or-fetch entry point
//! - `dispatch`: GET /, hands the next eligible request to a polling client
//! - `deliver`: POST /:queue/:digest, fetched body coming back
//! - `status`: GET /status, introspection

pub mod deliver;
pub mod dispatch;
pub mod enqueue;
pub mod status;

// Re-export handlers for convenience
pub use deliver::deliver;
pub use dispatch::next;
pub use enqueue::enqueue;
pub use status::status;

use axum::http::HeaderMap;

use crate::error::DispatchError;

/// Headers a client may identify itself with, most specific first.
const CLIENT_ID_HEADERS: [&str; 4] = [
    "x-client-id",
    "true-client-ip",
    "cf-connecting-ip",
    "x-forwarded-for",
];

/// First non-empty client-identifying header value. `x-forwarded-for` may
/// carry a hop chain; the first hop wins.
pub(crate) fn client_id(headers: &HeaderMap) -> Option<String> {
    for name in CLIENT_ID_HEADERS {
        let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) else {
            continue;
        };
        let value = value.split(',').next().unwrap_or("").trim();
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }
    None
}

/// Fallback for unknown method/path pairs.
pub async fn not_found() -> DispatchError {
    DispatchError::NotFound
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_client_id_prefers_explicit_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));
        headers.insert("x-client-id", HeaderValue::from_static("worker-7"));

        assert_eq!(client_id(&headers).as_deref(), Some("worker-7"));
    }

    #[test]
    fn test_client_id_forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );

        assert_eq!(client_id(&headers).as_deref(), Some("203.0.113.9"));
    }

    #[test]
    fn test_client_id_skips_empty_values() {
        let mut headers = HeaderMap::new();
        headers.insert("x-client-id", HeaderValue::from_static(""));
        headers.insert("cf-connecting-ip", HeaderValue::from_static("198.51.100.2"));

        assert_eq!(client_id(&headers).as_deref(), Some("198.51.100.2"));
    }

    #[test]
    fn test_client_id_absent() {
        assert!(client_id(&HeaderMap::new()).is_none());
    }
}
