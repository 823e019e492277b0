//! Error types for the dispatcher HTTP surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::cache::CacheError;
use crate::queues::QueueError;

/// Dispatcher error types.
///
/// No error path tears the dispatcher down; every variant renders as an HTTP
/// response. `NotFound` doubles as the late-delivery signal: a client
/// delivering a body for a request that timed out and was re-dispatched
/// elsewhere gets a 404 and its body is dropped.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Malformed enqueue body, bad URL, missing client id
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Unknown path, or delivery for a request no longer in the table
    #[error("Not Found: Error 404")]
    NotFound,

    /// Cooldown store failure
    #[error("Timer store error: {0}")]
    Store(#[from] sled::Error),

    /// Cache failure other than a miss
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Anything else unexpected
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<QueueError> for DispatchError {
    fn from(e: QueueError) -> Self {
        match e {
            // A host the registry refuses is the caller's problem.
            QueueError::InvalidHost(host) => {
                DispatchError::BadRequest(format!("invalid host: {host:?}"))
            }
            QueueError::Io(e) => DispatchError::Internal(format!("queue directory error: {e}")),
        }
    }
}

impl DispatchError {
    fn status(&self) -> StatusCode {
        match self {
            DispatchError::BadRequest(_) => StatusCode::BAD_REQUEST,
            DispatchError::NotFound => StatusCode::NOT_FOUND,
            DispatchError::Store(_) | DispatchError::Cache(_) | DispatchError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = match &self {
            DispatchError::NotFound => json!({ "message": self.to_string() }),
            DispatchError::BadRequest(_) => json!({
                "message": self.to_string(),
                "status": status.as_u16(),
            }),
            _ => json!({
                "message": self.to_string(),
                "status": status.as_u16(),
                "stack": format!("{self:?}"),
            }),
        };

        (status, Json(body)).into_response()
    }
}
