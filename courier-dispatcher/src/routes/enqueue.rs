//! Cache-or-fetch enqueue.
//!
//! The entry point of the dispatcher. A caller posts a URL; if a fresh cache
//! entry exists it streams back immediately, otherwise the caller coalesces
//! onto the in-flight request for that key: holding an open response stream,
//! or registering a webhook URL and getting a 202 right away.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use tokio::sync::oneshot;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use url::Url;

use crate::error::DispatchError;
use crate::key::cache_key;
use crate::state::AppState;
use crate::table::{Handler, PendingRequest};

/// Enqueue body.
#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    /// URL to fetch
    pub url: String,
    /// Freshness window in millis for cache hits; absent accepts any age
    pub expire: Option<u64>,
    /// Extra headers the fetcher sends upstream
    pub headers: Option<HashMap<String, String>>,
    /// Webhook URL for asynchronous reply; when set the response is a 202
    pub reply: Option<String>,
}

/// Enqueue a fetch
///
/// POST /
pub async fn enqueue(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<EnqueueRequest>, JsonRejection>,
) -> Result<Response, DispatchError> {
    let Json(request) = payload.map_err(|e| DispatchError::BadRequest(e.body_text()))?;

    let href = Url::parse(&request.url)
        .map_err(|e| DispatchError::BadRequest(format!("bad url: {e}")))?;
    let host = href
        .host_str()
        .ok_or_else(|| DispatchError::BadRequest("url has no host".to_string()))?
        .to_string();
    if let Some(reply) = &request.reply {
        Url::parse(reply)
            .map_err(|e| DispatchError::BadRequest(format!("bad reply url: {e}")))?;
    }

    let (queue_name, key) = {
        let mut core = state.core.lock().await;
        let queue = core.queues.resolve(&host)?;
        let key = cache_key(&queue.name, href.path(), href.query().unwrap_or(""));
        (queue.name.clone(), key)
    };

    // Fresh cache entry: stream it straight back, no request created.
    let expire = request.expire.map(Duration::from_millis);
    if let Some(hit) = state.cache.open_for_read(&key, expire).await? {
        debug!(key = %key, "cache hit");
        let body = Body::from_stream(ReaderStream::new(hit.file));
        return Response::builder()
            .status(StatusCode::OK)
            .header("x-from-cache", &key)
            .body(body)
            .map_err(|e| DispatchError::Internal(e.to_string()));
    }

    // Miss: attach to the in-flight request for this key, creating it if
    // this caller is first.
    let (handler, stream) = match request.reply.clone() {
        Some(url) => (Handler::Webhook { url }, None),
        None => {
            let (tx, rx) = oneshot::channel();
            let id = state.next_handler_id();
            (Handler::Stream { id, tx }, Some((id, rx)))
        }
    };

    {
        let mut core = state.core.lock().await;
        if !core.table.contains(&key) {
            core.table.insert(PendingRequest::new(
                key.clone(),
                request.url.clone(),
                request.headers.clone(),
                queue_name,
            ));
            info!(key = %key, url = %request.url, "pending request created");
        } else {
            debug!(key = %key, "coalesced onto in-flight request");
        }
        core.table.attach(&key, handler);
    }

    let Some((handler_id, rx)) = stream else {
        // Webhook registered; the reply comes asynchronously.
        return Response::builder()
            .status(StatusCode::ACCEPTED)
            .header("x-request-key", &key)
            .body(Body::empty())
            .map_err(|e| DispatchError::Internal(e.to_string()));
    };

    // If the caller goes away before delivery, the guard detaches the
    // handler, removing the whole request when it was the last waiter.
    let mut guard = StreamGuard {
        state: state.clone(),
        key: key.clone(),
        handler_id,
        armed: true,
    };

    match rx.await {
        Ok(body) => {
            guard.armed = false;
            Response::builder()
                .status(StatusCode::OK)
                .header("x-request-key", &key)
                .body(Body::from(body))
                .map_err(|e| DispatchError::Internal(e.to_string()))
        }
        Err(_) => {
            // Sender dropped without a send: the request vanished from the
            // table without notifying us.
            guard.armed = false;
            Err(DispatchError::Internal(
                "fetch aborted before delivery".to_string(),
            ))
        }
    }
}

/// Detaches a stream handler whose caller cancelled before delivery.
struct StreamGuard {
    state: Arc<AppState>,
    key: String,
    handler_id: u64,
    armed: bool,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let state = self.state.clone();
        let key = std::mem::take(&mut self.key);
        let handler_id = self.handler_id;
        tokio::spawn(async move {
            let mut core = state.core.lock().await;
            if core.table.detach_stream(&key, handler_id) {
                debug!(key = %key, "pending request removed after last waiter cancelled");
            }
        });
    }
}
