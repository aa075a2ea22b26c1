//! API route definitions

use axum::routing::{get, post};
use axum::Router;

use super::handlers;
use super::server::AppState;

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/api/status", get(handlers::health::status))
        .nest("/api/proxy", pool_routes())
        .with_state(state)
}

/// Pool inspection and control
fn pool_routes() -> Router<AppState> {
    Router::new()
        .route("/pool/status", get(handlers::pool::pool_status))
        .route("/pool/health-check", post(handlers::pool::force_health_check))
        .route("/test", get(handlers::pool::test_pool))
}
