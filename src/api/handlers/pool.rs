//! Proxy pool handlers

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, info};

use crate::api::server::AppState;
use crate::error::PoolError;
use crate::models::PoolStatus;
use crate::proxy::ProxyPool;

fn require_pool(state: &AppState) -> Result<&Arc<ProxyPool>, PoolError> {
    state
        .pool
        .as_ref()
        .ok_or_else(|| PoolError::Internal("proxy pool is not initialized".to_string()))
}

/// Current pool status
pub async fn pool_status(State(state): State<AppState>) -> Response {
    info!("Querying proxy pool status");

    match require_pool(&state) {
        Ok(pool) => Json(pool.get_pool_status()).into_response(),
        Err(e) => {
            error!("Failed to get proxy pool status: {}", e);
            // Same shape as a healthy response, zeroed, plus the error.
            let mut body = serde_json::to_value(PoolStatus::empty()).unwrap_or_else(|_| json!({}));
            body["error"] = json!(e.to_string());
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

/// Run a full probe pass now
pub async fn force_health_check(State(state): State<AppState>) -> Response {
    info!("Forcing proxy pool health check");

    match require_pool(&state) {
        Ok(pool) => {
            let report = pool.force_health_check().await;
            Json(json!({
                "message": "Health check completed",
                "status": "success",
                "healthy": report.healthy,
                "unhealthy": report.unhealthy
            }))
            .into_response()
        }
        Err(e) => {
            error!("Forced health check failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "message": format!("Health check failed: {}", e),
                    "status": "error"
                })),
            )
                .into_response()
        }
    }
}

/// Pick a proxy the way an outbound call would
pub async fn test_pool(State(state): State<AppState>) -> Response {
    info!("Testing proxy pool");

    let pool = match require_pool(&state) {
        Ok(pool) => pool,
        Err(e) => {
            error!("Proxy pool test failed: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "message": format!("Proxy pool test failed: {}", e),
                    "status": "error"
                })),
            )
                .into_response();
        }
    };

    match pool.get_next_proxy() {
        Some(proxy) => Json(json!({
            "message": "Proxy pool is working",
            "proxy_used": proxy.key(),
            "proxy_healthy": proxy.is_healthy,
            "total_healthy": pool.get_healthy_proxies().len(),
            "status": "success"
        }))
        .into_response(),
        None => Json(json!({
            "message": "No healthy proxy available",
            "total_healthy": 0,
            "status": "warning"
        }))
        .into_response(),
    }
}
