//! Introspection endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::error::DispatchError;
use crate::state::{now_ms, AppState};

/// Dispatcher status
///
/// GET /status
pub async fn status(State(state): State<Arc<AppState>>) -> Result<Json<Value>, DispatchError> {
    let (clients, requests) = {
        let core = state.core.lock().await;
        let requests: Vec<Value> = core
            .table
            .values()
            .map(|r| {
                json!({
                    "key": r.key,
                    "href": r.href,
                    "queue": r.queue_name,
                    "attempts": r.attempts,
                    "startedAt": r.started_at,
                    "handlers": r.handlers.len(),
                })
            })
            .collect();
        (core.clients.snapshot(), requests)
    };

    let timers = state.cooldowns.all(now_ms())?;

    Ok(Json(json!({
        "clients": clients,
        "timers": timers,
        "requests": requests,
        "startAt": state.start_at,
    })))
}
