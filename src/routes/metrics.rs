use axum::{extract::State, response::Json as ResponseJson, routing::get, Json, Router};

use crate::metrics::MetricsSnapshot;
use crate::models::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/metrics", get(get_metrics))
        .with_state(state)
}

/// Current window, last aggregate and the config version history
async fn get_metrics(State(state): State<AppState>) -> ResponseJson<MetricsSnapshot> {
    Json(state.metrics.snapshot().await)
}
