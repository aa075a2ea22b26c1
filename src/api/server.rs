//! API server using Axum
//!
//! Serves the admin endpoints for the proxy pool.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::ApiServerConfig;
use crate::error::{PoolError, Result};
use crate::proxy::ProxyPool;

use super::routes;

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    /// `None` when the pool failed to come up; handlers then report degraded
    pub pool: Option<Arc<ProxyPool>>,
    pub started_at: Instant,
}

/// API server
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(config: ApiServerConfig, pool: Option<Arc<ProxyPool>>) -> Self {
        Self {
            config,
            state: AppState {
                pool,
                started_at: Instant::now(),
            },
        }
    }

    /// Build the router
    fn build_router(&self) -> Router {
        routes::create_router(self.state.clone()).layer(TraceLayer::new_for_http())
    }

    /// Run the API server until shutdown is signalled
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| {
                PoolError::InvalidConfig(format!(
                    "invalid API address {}:{}: {}",
                    self.config.host, self.config.port, e
                ))
            })?;

        let router = self.build_router();
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!("API server listening on {}", addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| PoolError::Internal(e.to_string()))?;

        info!("API server shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_address_is_rejected() {
        let server = ApiServer::new(
            ApiServerConfig {
                port: 8001,
                host: "not an address".to_string(),
            },
            None,
        );
        let (_tx, rx) = watch::channel(false);

        assert!(matches!(
            server.run(rx).await,
            Err(PoolError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_server_stops_on_shutdown() {
        let server = ApiServer::new(
            ApiServerConfig {
                port: 0,
                host: "127.0.0.1".to_string(),
            },
            None,
        );
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn(async move { server.run(rx).await });
        tokio::task::yield_now().await;
        tx.send(true).unwrap();

        tokio_test::assert_ok!(task.await.unwrap());
    }
}
