//! Fetched-body delivery.
//!
//! A fetcher POSTs the body it fetched back under the request's cache key.
//! The body fans out to every waiter attached to the pending request; a 200
//! upstream status additionally gates the cache write. A 404 here is
//! routine: the request timed out, was re-dispatched, and another client
//! answered first.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::error::DispatchError;
use crate::state::{now_ms, AppState};
use crate::table::{Handler, PendingRequest};
use crate::webhook;

/// Deliver a fetched body
///
/// POST /:queue/:digest
pub async fn deliver(
    State(state): State<Arc<AppState>>,
    Path((queue, digest)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, DispatchError> {
    let key = format!("{queue}/{digest}");
    let status: u16 = headers
        .get("x-status")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(200);

    let request = {
        let mut core = state.core.lock().await;
        let Some(request) = core.table.take(&key) else {
            debug!(key = %key, "late delivery for a request no longer in flight");
            return Err(DispatchError::NotFound);
        };
        // A delivery without identifying headers still counts, against
        // "anonymous".
        let client_id =
            super::client_id(&headers).unwrap_or_else(|| "anonymous".to_string());
        core.clients.touch(&client_id, now_ms()).finished += 1;
        request
    };
    let PendingRequest { href, handlers, .. } = request;

    info!(
        key = %key,
        status,
        handlers = handlers.len(),
        bytes = body.len(),
        "response delivered"
    );

    // The cache write (200 only) overlaps handler notification and is
    // awaited before the ack; a failure is logged, never surfaced to the
    // delivering client.
    let cache_write = (status == 200).then(|| {
        let cache = state.cache.clone();
        let key = key.clone();
        let body = body.clone();
        tokio::spawn(async move {
            if let Err(e) = cache.write(&key, &body).await {
                warn!(key = %key, error = %e, "cache write failed");
            }
        })
    });

    // Stream waiters are resolved synchronously in attach order; webhook
    // POSTs run detached and are not awaited for the ack.
    for handler in handlers {
        match handler {
            Handler::Stream { tx, .. } => {
                // The receiver may have cancelled in the race window.
                let _ = tx.send(body.clone());
            }
            Handler::Webhook { url } => {
                tokio::spawn(webhook::deliver(
                    state.http.clone(),
                    url,
                    key.clone(),
                    href.clone(),
                    status,
                    body.clone(),
                ));
            }
        }
    }

    if let Some(write) = cache_write {
        let _ = write.await;
    }

    Ok(StatusCode::NO_CONTENT)
}
