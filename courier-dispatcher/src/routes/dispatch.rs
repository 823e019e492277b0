//! Work dispatch to polling clients.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::DispatchError;
use crate::scheduler;
use crate::state::{now_ms, AppState};

/// Hand the next eligible request to the calling client
///
/// GET /
///
/// The caller must identify itself (`x-client-id` or one of the ip headers);
/// a 204 means nothing is eligible right now, poll again later.
pub async fn next(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, DispatchError> {
    let client_id = super::client_id(&headers)
        .ok_or_else(|| DispatchError::BadRequest("missing client id".to_string()))?;

    let dispatch = {
        let mut core = state.core.lock().await;
        scheduler::next_for(&mut core, &state.cooldowns, &client_id, now_ms())?
    };

    match dispatch {
        Some(dispatch) => Ok(Json(dispatch).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}
