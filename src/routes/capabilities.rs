use axum::{extract::State, response::Json as ResponseJson, routing::get, Json, Router};

use crate::models::AppState;
use crate::pipeline::Capabilities;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/capabilities", get(get_capabilities))
        .with_state(state)
}

async fn get_capabilities(State(state): State<AppState>) -> ResponseJson<Capabilities> {
    Json(state.orchestrator.capabilities().await)
}
