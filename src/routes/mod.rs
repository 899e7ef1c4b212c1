//! API Routes
//!
//! - `/api/query` - Run one query through the phase pipeline
//! - `/api/query/stream` - Same, as Server-Sent Events
//! - `/api/capabilities` - Active method version, phases and feature flags
//! - `/api/metrics` - Quality window and config version history
//! - `/api/health` - Health check

pub mod capabilities;
pub mod health;
pub mod metrics;
pub mod query;

use axum::Router;
use tracing::info;

use crate::models::AppState;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");

    Router::new()
        .merge(query::router(state.clone()))
        .merge(capabilities::router(state.clone()))
        .merge(metrics::router(state.clone()))
        .merge(health::router(state))
}
