//! Versioned schema for the proxy state store
//!
//! Each pending migration runs in its own transaction together with the
//! row that marks it applied, so a failed step leaves nothing behind.

use std::collections::HashSet;

use sqlx::{Executor, PgPool};
use tracing::{debug, info};

use crate::error::Result;

struct Migration {
    version: i32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "proxy_state_table",
    sql: r#"
CREATE TABLE IF NOT EXISTS proxy_state (
    proxy_key VARCHAR(255) NOT NULL,
    field VARCHAR(64) NOT NULL,
    value TEXT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (proxy_key, field)
);

CREATE INDEX IF NOT EXISTS idx_proxy_state_updated_at ON proxy_state(updated_at DESC);
"#,
}];

/// Apply every migration not yet recorded in `schema_migrations`.
///
/// Returns how many were applied.
pub async fn run_migrations(pool: &PgPool) -> Result<usize> {
    pool.execute(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .await?;

    let applied: HashSet<i32> =
        sqlx::query_scalar::<_, i32>("SELECT version FROM schema_migrations")
            .fetch_all(pool)
            .await?
            .into_iter()
            .collect();

    let mut count = 0;
    for migration in pending(&applied) {
        info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );

        let mut tx = pool.begin().await?;
        // Multi-statement SQL goes over the simple query protocol.
        (&mut *tx).execute(migration.sql).await?;
        sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
            .bind(migration.version)
            .bind(migration.name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        count += 1;
    }

    debug!("{} of {} migrations already applied", applied.len(), MIGRATIONS.len());
    Ok(count)
}

fn pending(applied: &HashSet<i32>) -> impl Iterator<Item = &'static Migration> + '_ {
    MIGRATIONS
        .iter()
        .filter(move |m| !applied.contains(&m.version))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_ascend_without_gaps() {
        let versions: Vec<i32> = MIGRATIONS.iter().map(|m| m.version).collect();
        let expected: Vec<i32> = (1..=MIGRATIONS.len() as i32).collect();
        assert_eq!(versions, expected);
    }

    #[test]
    fn test_pending_skips_applied_versions() {
        assert_eq!(pending(&HashSet::new()).count(), MIGRATIONS.len());

        let applied: HashSet<i32> = MIGRATIONS.iter().map(|m| m.version).collect();
        assert_eq!(pending(&applied).count(), 0);
    }

    #[test]
    fn test_state_table_matches_store_queries() {
        let sql = MIGRATIONS[0].sql;
        assert!(sql.contains("proxy_state"));
        assert!(sql.contains("PRIMARY KEY (proxy_key, field)"));
    }
}
