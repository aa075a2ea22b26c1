use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use super::{ProxyStore, StoredFields};
use crate::error::Result;

/// Postgres-backed store keeping one row per `(proxy_key, field)`
#[derive(Clone)]
pub struct PgProxyStore {
    pool: PgPool,
}

impl PgProxyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProxyStore for PgProxyStore {
    async fn load_all(&self) -> Result<HashMap<String, StoredFields>> {
        let rows = sqlx::query_as::<_, (String, String, String)>(
            r#"
            SELECT proxy_key, field, value
            FROM proxy_state
            ORDER BY proxy_key
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut records: HashMap<String, StoredFields> = HashMap::new();
        for (key, field, value) in rows {
            records.entry(key).or_default().insert(field, value);
        }

        debug!(count = records.len(), "Loaded proxy state rows");
        Ok(records)
    }

    async fn save(&self, key: &str, fields: &StoredFields) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for (field, value) in fields {
            sqlx::query(
                r#"
                INSERT INTO proxy_state (proxy_key, field, value)
                VALUES ($1, $2, $3)
                ON CONFLICT (proxy_key, field)
                DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
                "#,
            )
            .bind(key)
            .bind(field)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
