use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unified error type for the proxy pool
#[derive(Error, Debug)]
pub enum PoolError {
    // Persistence errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database connection failed: {0}")]
    DatabaseConnection(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Malformed proxy record {key}: {reason}")]
    MalformedRecord { key: String, reason: String },

    // Proxy errors
    #[error("No healthy proxy available")]
    NoHealthyProxy,

    #[error("Proxy connection failed: {0}")]
    ProxyConnectionFailed(String),

    #[error("Health probe failed: {0}")]
    ProbeFailed(String),

    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    #[error("Unsupported proxy protocol: {0}")]
    UnsupportedProtocol(String),

    // Outbound transport errors
    #[error("Rate limited by upstream (HTTP 429)")]
    RateLimited,

    #[error("Operation timed out")]
    Timeout,

    #[error("Unexpected upstream status: HTTP {0}")]
    UnexpectedStatus(u16),

    #[error("Transport error: {0}")]
    Transport(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;

impl PoolError {
    pub fn malformed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        PoolError::MalformedRecord {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            PoolError::InvalidProxyAddress(_)
            | PoolError::UnsupportedProtocol(_)
            | PoolError::InvalidConfig(_) => StatusCode::BAD_REQUEST,

            // 429 Too Many Requests
            PoolError::RateLimited => StatusCode::TOO_MANY_REQUESTS,

            // 502 Bad Gateway
            PoolError::ProxyConnectionFailed(_)
            | PoolError::ProbeFailed(_)
            | PoolError::UnexpectedStatus(_)
            | PoolError::Transport(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            PoolError::NoHealthyProxy | PoolError::DatabaseConnection(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            // 504 Gateway Timeout
            PoolError::Timeout => StatusCode::GATEWAY_TIMEOUT,

            // 500 Internal Server Error
            PoolError::Database(_)
            | PoolError::Persistence(_)
            | PoolError::MalformedRecord { .. }
            | PoolError::Io(_)
            | PoolError::Http(_)
            | PoolError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

// Implement IntoResponse for API error responses
impl IntoResponse for PoolError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

// Convert from hyper errors
impl From<hyper::Error> for PoolError {
    fn from(err: hyper::Error) -> Self {
        PoolError::Http(err.to_string())
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for PoolError {
    fn from(err: url::ParseError) -> Self {
        PoolError::InvalidProxyAddress(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for PoolError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        PoolError::Timeout
    }
}
