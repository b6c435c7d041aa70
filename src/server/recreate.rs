//! Commit recreation endpoints.
//!
//! Both endpoints validate the request before doing anything else, so bad
//! input and missing configuration are always answered with a JSON body and
//! a 4xx/5xx status, never with an event stream. Once accepted, a recreation
//! is detached from the connection that asked for it.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, warn};

use super::AppState;
use crate::effects::{GitHubInterpreter, GitInterpreter};
use crate::queue::OperationStore;
use crate::recreate::{
    ProgressEvent, ProgressSink, RecreateError, RecreateInput, RecreationRequest,
    RecreationResult, ResultEvent,
};

/// `POST /api/create-pr`: `repoUrl` is the fork, both hashes required.
pub async fn create_pr_handler<H, G, S>(
    State(app_state): State<AppState<H, G, S>>,
    headers: HeaderMap,
    body: Result<Json<RecreateInput>, JsonRejection>,
) -> Response
where
    H: GitHubInterpreter,
    G: GitInterpreter,
    S: OperationStore,
{
    match body {
        Ok(Json(input)) => run(app_state, &headers, RecreationRequest::manual(input)).await,
        Err(rejection) => rejected(rejection),
    }
}

/// `POST /api/create-pr/auto`: `repoUrl` is the upstream, hashes optional.
pub async fn create_pr_auto_handler<H, G, S>(
    State(app_state): State<AppState<H, G, S>>,
    headers: HeaderMap,
    body: Result<Json<RecreateInput>, JsonRejection>,
) -> Response
where
    H: GitHubInterpreter,
    G: GitInterpreter,
    S: OperationStore,
{
    match body {
        Ok(Json(input)) => run(app_state, &headers, RecreationRequest::auto(input)).await,
        Err(rejection) => rejected(rejection),
    }
}

async fn run<H, G, S>(
    app_state: AppState<H, G, S>,
    headers: &HeaderMap,
    request: RecreationRequest,
) -> Response
where
    H: GitHubInterpreter,
    G: GitInterpreter,
    S: OperationStore,
{
    let recreator = Arc::clone(app_state.recreator());
    if let Err(e) = recreator.validate(&request) {
        debug!(error = %e, "Rejected recreation request");
        return respond(Err(e));
    }

    // In both variants the pipeline runs on its own task, so it finishes even
    // if the client disconnects.
    if !wants_event_stream(headers) {
        let task =
            tokio::spawn(async move { recreator.recreate(request, &ProgressSink::discard()).await });
        return match task.await {
            Ok(outcome) => respond(outcome),
            Err(e) => {
                error!(error = %e, "Recreation task did not complete");
                respond(Err(RecreateError::Io(std::io::Error::other(e.to_string()))))
            }
        };
    }

    let (sink, events) = ProgressSink::channel();
    tokio::spawn(async move {
        let _ = recreator.recreate(request, &sink).await;
    });

    Sse::new(UnboundedReceiverStream::new(events).map(frame))
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn frame(event: ProgressEvent) -> Result<Event, Infallible> {
    Ok(Event::default().json_data(&event).unwrap_or_else(|e| {
        warn!(error = %e, "Could not encode progress event");
        Event::default().comment("unencodable event")
    }))
}

fn wants_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/event-stream"))
}

/// The result event as JSON, with the status mapped from the error class.
fn respond(outcome: Result<RecreationResult, RecreateError>) -> Response {
    let status = match &outcome {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        }
    };
    (status, Json(ResultEvent::from_outcome(&outcome))).into_response()
}

fn rejected(rejection: JsonRejection) -> Response {
    respond(Err(RecreateError::InvalidInput(rejection.body_text())))
}
