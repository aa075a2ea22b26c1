//! Liveness and process status endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::server::AppState;

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "warp-pool"
        })),
    )
}

/// Process status: uptime and whether the pool is up
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let (pool_initialized, health_checker_running) = match &state.pool {
        Some(pool) => (true, pool.is_health_checker_running()),
        None => (false, false),
    };

    Json(json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "pool_initialized": pool_initialized,
        "health_checker_running": health_checker_running
    }))
}
