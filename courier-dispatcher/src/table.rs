//! Pending-request table and waiter multiplexing.
//!
//! The table maps a cache key to the single in-flight request for that key.
//! All callers interested in the same URL coalesce onto one `PendingRequest`
//! by attaching a handler: either a one-shot channel feeding an open response
//! stream, or a webhook URL to POST once the body arrives.
//!
//! Invariants:
//! - at most one `PendingRequest` per cache key;
//! - a request with no handlers left is removed from the table;
//! - the key's queue-name prefix always matches `queue_name`.

use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::oneshot;

/// Millis after which a dispatched request becomes eligible again.
pub const DISPATCH_TIMEOUT_MS: u64 = 10_000;

/// A waiter attached to a pending request.
#[derive(Debug)]
pub enum Handler {
    /// One-shot delivery into an open response stream held by a caller.
    /// `id` identifies the handler so a cancelled stream can detach itself.
    Stream { id: u64, tx: oneshot::Sender<Bytes> },
    /// Absolute URL POSTed with the body once available
    Webhook { url: String },
}

/// A cache-or-fetch request waiting for a fetcher to produce its body.
#[derive(Debug)]
pub struct PendingRequest {
    /// `queue_name/<digest>`
    pub key: String,
    /// Full URL to fetch
    pub href: String,
    /// Extra headers the fetcher should send upstream
    pub headers: Option<HashMap<String, String>>,
    /// Canonical queue the request belongs to
    pub queue_name: String,
    /// Monotonic enqueue timestamp; the scheduler serves oldest first
    pub created_at: Instant,
    /// Wall-clock epoch millis of the last dispatch, unset until claimed
    pub started_at: Option<u64>,
    /// Number of re-dispatches after timeouts
    pub attempts: u32,
    /// Waiters, notified in attach order
    pub handlers: Vec<Handler>,
}

impl PendingRequest {
    pub fn new(
        key: String,
        href: String,
        headers: Option<HashMap<String, String>>,
        queue_name: String,
    ) -> Self {
        Self {
            key,
            href,
            headers,
            queue_name,
            created_at: Instant::now(),
            started_at: None,
            attempts: 0,
            handlers: Vec::new(),
        }
    }

    /// Whether the scheduler may (re-)dispatch this request at `now_ms`.
    ///
    /// Never-dispatched requests count as infinitely old and are always
    /// eligible.
    pub fn is_eligible(&self, now_ms: u64) -> bool {
        match self.started_at {
            None => true,
            Some(started_at) => now_ms.saturating_sub(started_at) >= DISPATCH_TIMEOUT_MS,
        }
    }
}

/// Map from cache key to the unique in-flight request for that key.
#[derive(Default)]
pub struct RequestTable {
    requests: HashMap<String, PendingRequest>,
}

impl RequestTable {
    pub fn get(&self, key: &str) -> Option<&PendingRequest> {
        self.requests.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut PendingRequest> {
        self.requests.get_mut(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.requests.contains_key(key)
    }

    /// Insert a freshly created request. The caller must have checked that no
    /// request for this key exists yet.
    pub fn insert(&mut self, request: PendingRequest) {
        debug_assert!(!self.requests.contains_key(&request.key));
        self.requests.insert(request.key.clone(), request);
    }

    /// Attach a handler to an existing request. Returns false if no request
    /// for the key is in flight.
    pub fn attach(&mut self, key: &str, handler: Handler) -> bool {
        match self.requests.get_mut(key) {
            Some(request) => {
                request.handlers.push(handler);
                true
            }
            None => false,
        }
    }

    /// Remove and return the request for `key`, typically on delivery.
    pub fn take(&mut self, key: &str) -> Option<PendingRequest> {
        self.requests.remove(key)
    }

    /// Detach a cancelled stream handler.
    ///
    /// Returns true when this was the last handler and the request was
    /// removed from the table. A no-op when delivery already took the
    /// request: that is the delivery/cancel race, and losing it is fine.
    pub fn detach_stream(&mut self, key: &str, handler_id: u64) -> bool {
        let Some(request) = self.requests.get_mut(key) else {
            return false;
        };
        request
            .handlers
            .retain(|h| !matches!(h, Handler::Stream { id, .. } if *id == handler_id));
        if request.handlers.is_empty() {
            self.requests.remove(key);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &PendingRequest> {
        self.requests.values()
    }
}
