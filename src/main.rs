//! warp-pool - Entry Point
//!
//! Loads the proxy pool, starts background health checking and serves the
//! admin API until a shutdown signal arrives.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use warp_pool::api::ApiServer;
use warp_pool::config::{Config, LogConfig};
use warp_pool::database::Database;
use warp_pool::proxy::{HttpProbe, PoolConfig, ProxyPool};
use warp_pool::repository::{MemoryStore, PgProxyStore, ProxyStore};
use warp_pool::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.log);

    info!("Starting warp-pool");
    info!(
        proxies = config.pool.proxies.len(),
        strategy = %config.pool.rotation_strategy,
        "Configuration loaded"
    );

    let (store, db) = open_store(&config).await;

    let pool = match build_pool(&config, store).await {
        Ok(pool) => Some(pool),
        Err(e) => {
            error!("Proxy pool failed to start, serving degraded status: {}", e);
            None
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let api_server = ApiServer::new(config.api.clone(), pool.clone());
    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run(shutdown_rx).await {
            error!("API server error: {}", e);
        }
    });

    info!("Admin API started on {}", config.api_addr());

    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    if let Some(pool) = &pool {
        pool.shutdown().await;
    }
    let _ = api_task.await;

    if let Some(db) = db {
        db.close().await;
    }

    info!("warp-pool stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("warp_pool={},tower_http=info", log.level).into());

    if log.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Postgres-backed store when configured and reachable, otherwise in-memory
async fn open_store(config: &Config) -> (Arc<dyn ProxyStore>, Option<Database>) {
    let Some(db_config) = &config.database else {
        info!("DATABASE_URL not set, proxy state will not survive restarts");
        return (Arc::new(MemoryStore::new()), None);
    };

    let db = match Database::new(db_config).await {
        Ok(db) => db,
        Err(e) => {
            warn!("Falling back to in-memory proxy state: {}", e);
            return (Arc::new(MemoryStore::new()), None);
        }
    };

    if let Err(e) = db.run_migrations().await {
        warn!("Falling back to in-memory proxy state: {}", e);
        db.close().await;
        return (Arc::new(MemoryStore::new()), None);
    }

    (Arc::new(PgProxyStore::new(db.pool().clone())), Some(db))
}

async fn build_pool(config: &Config, store: Arc<dyn ProxyStore>) -> Result<Arc<ProxyPool>> {
    let probe = HttpProbe::new(&config.health.url, config.health.expected_status)?;
    let pool = ProxyPool::new(PoolConfig::from(config), store, Arc::new(probe));
    pool.initialize(&config.pool.proxies).await?;
    Ok(pool)
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
