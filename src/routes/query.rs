use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::post,
    Json, Router,
};
use futures::stream::{self, Stream};
use tracing::{info, warn};

use crate::models::{AppState, QueryRequest};
use crate::pipeline::{PipelineEvent, QueryStatus};
use crate::types::AppResult;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/query", post(run_query))
        .route("/api/query/stream", post(stream_query))
        .with_state(state)
}

/// Runs the full pipeline. A critical-phase abort answers 500 with the
/// partial outcome attached.
pub async fn run_query(State(state): State<AppState>, Json(request): Json<QueryRequest>) -> AppResult<Response> {
    info!(query_len = request.query.len(), "Received query");

    let outcome = state.orchestrator.run(&request.query).await?;
    let status = match outcome.status {
        QueryStatus::Completed => StatusCode::OK,
        QueryStatus::Failed => StatusCode::INTERNAL_SERVER_ERROR,
    };
    Ok((status, Json(outcome)).into_response())
}

pub async fn stream_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    info!(query_len = request.query.len(), "Received streaming query");

    let rx = Arc::clone(&state.orchestrator).run_streaming(request.query)?;
    let events = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok(to_sse(&event)), rx))
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn to_sse(event: &PipelineEvent) -> Event {
    Event::default()
        .event(event.name())
        .json_data(event)
        .unwrap_or_else(|e| {
            warn!(error = %e, "Failed to encode pipeline event");
            Event::default().event("error").data(e.to_string())
        })
}
