use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::{PoolError, Result};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
const IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const MAX_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// Postgres connections backing the proxy state store
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect using `config`; failures surface as `DatabaseConnection`
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .idle_timeout(IDLE_TIMEOUT)
            .max_lifetime(MAX_LIFETIME)
            .connect(&config.url)
            .await
            .map_err(|e| PoolError::DatabaseConnection(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            "Connected to proxy state database"
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Bring the proxy state schema up to date
    pub async fn run_migrations(&self) -> Result<()> {
        let applied = super::migrations::run_migrations(&self.pool).await?;
        info!("Database schema up to date ({} migrations applied)", applied);
        Ok(())
    }

    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }
}
