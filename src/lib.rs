// Oxidized Method - configuration-driven scientific-method reasoning engine

pub mod agents;
pub mod config;
pub mod llm;
pub mod method;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod search;
pub mod types;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports for convenience
pub use config::Config;
pub use models::AppState;

pub fn create_router(state: AppState) -> axum::Router {
    routes::create_router(state)
}
