//! Operation queue endpoints.
//!
//! `POST /api/queue/process` is meant to be hit by an external scheduler.
//! Rate limiting is not an error: the call answers 200 with
//! `processed: false` and the number of seconds to wait.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{error, info};

use super::AppState;
use crate::effects::{GitHubInterpreter, GitInterpreter};
use crate::queue::{OperationStore, ProcessError, ProcessOutcome, QueueStatus, StoreError};
use crate::types::{Operation, OperationId, OperationPayload};

/// Errors answered by the queue endpoints.
#[derive(Debug, Error)]
pub enum QueueApiError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("operation {0} not found")]
    NotFound(OperationId),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

impl QueueApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            QueueApiError::InvalidPayload(_) => "invalid_payload",
            QueueApiError::NotFound(_) => "not_found",
            QueueApiError::Store(_) | QueueApiError::Process(_) => "storage",
        }
    }
}

impl IntoResponse for QueueApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            QueueApiError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            QueueApiError::NotFound(_) => StatusCode::NOT_FOUND,
            QueueApiError::Store(_) | QueueApiError::Process(_) => {
                error!(error = %self, "Queue request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (
            status,
            Json(json!({ "error": self.to_string(), "kind": self.kind() })),
        )
            .into_response()
    }
}

/// `POST /api/queue`: enqueue `{ "type": ..., "payload": {...} }`.
pub async fn enqueue_handler<H, G, S>(
    State(app_state): State<AppState<H, G, S>>,
    body: Result<Json<OperationPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<serde_json::Value>), QueueApiError>
where
    H: GitHubInterpreter,
    G: GitInterpreter,
    S: OperationStore,
{
    let Json(payload) = body.map_err(|e| QueueApiError::InvalidPayload(e.body_text()))?;
    let operation_type = payload.operation_type();
    let id = app_state
        .store()
        .enqueue(payload, app_state.clock().utc())
        .await?;
    info!(operation_id = %id, %operation_type, "Enqueued operation");
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

/// `GET /api/queue/operations/{id}`
pub async fn operation_handler<H, G, S>(
    State(app_state): State<AppState<H, G, S>>,
    Path(id): Path<i64>,
) -> Result<Json<Operation>, QueueApiError>
where
    H: GitHubInterpreter,
    G: GitInterpreter,
    S: OperationStore,
{
    let id = OperationId(id);
    app_state
        .store()
        .get(id)
        .await?
        .map(Json)
        .ok_or(QueueApiError::NotFound(id))
}

/// `POST /api/queue/process`
pub async fn process_handler<H, G, S>(
    State(app_state): State<AppState<H, G, S>>,
) -> Result<Json<ProcessOutcome>, QueueApiError>
where
    H: GitHubInterpreter,
    G: GitInterpreter,
    S: OperationStore,
{
    Ok(Json(app_state.processor().process_next().await?))
}

/// `GET /api/queue/process`
pub async fn queue_status_handler<H, G, S>(
    State(app_state): State<AppState<H, G, S>>,
) -> Result<Json<QueueStatus>, QueueApiError>
where
    H: GitHubInterpreter,
    G: GitInterpreter,
    S: OperationStore,
{
    Ok(Json(app_state.processor().status().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn error_body(err: QueueApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn not_found_body() {
        let (status, body) = error_body(QueueApiError::NotFound(OperationId(7))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            body,
            json!({ "error": "operation 7 not found", "kind": "not_found" })
        );
    }

    #[tokio::test]
    async fn storage_failure_is_500() {
        let err = QueueApiError::Store(StoreError::storage("enqueue", "disk I/O error"));
        let (status, body) = error_body(err).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["kind"], "storage");
    }
}
