//! Embedded schema migrations and the boot-time pool connector.
//!
//! Migrations are SQL files compiled into the binary, applied in version
//! order inside one transaction each, and tracked in `schema_migrations`
//! with a content checksum. Editing an already-applied file is a hard
//! error, not a silent re-run.

use crate::error::AppError;
use sha2::{Digest, Sha256};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

pub struct Migration {
    pub version: i32,
    pub name: &'static str,
    pub sql: &'static str,
}

pub const MIGRATIONS: [Migration; 2] = [
    Migration {
        version: 1,
        name: "init",
        sql: include_str!("../migrations/0001_init.sql"),
    },
    Migration {
        version: 2,
        name: "page_elements",
        sql: include_str!("../migrations/0002_page_elements.sql"),
    },
];

fn checksum(sql: &str) -> String {
    hex::encode(Sha256::digest(sql.as_bytes()))
}

/// Apply all pending migrations. Idempotent across restarts.
pub async fn run(pool: &PgPool) -> Result<(), AppError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations ( \
           version INTEGER PRIMARY KEY, \
           checksum TEXT NOT NULL, \
           applied_at TIMESTAMPTZ NOT NULL DEFAULT now() \
         )",
    )
    .execute(pool)
    .await?;

    for migration in &MIGRATIONS {
        let sum = checksum(migration.sql);
        let applied: Option<(String,)> =
            sqlx::query_as("SELECT checksum FROM schema_migrations WHERE version = $1")
                .bind(migration.version)
                .fetch_optional(pool)
                .await?;
        match applied {
            Some((stored,)) if stored == sum => continue,
            Some(_) => {
                return Err(AppError::Internal(format!(
                    "migration {} ({}) changed after being applied",
                    migration.version, migration.name
                )))
            }
            None => {}
        }
        let mut tx = pool.begin().await?;
        sqlx::raw_sql(migration.sql).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO schema_migrations (version, checksum) VALUES ($1, $2)")
            .bind(migration.version)
            .bind(&sum)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::info!(version = migration.version, name = migration.name, "migration applied");
    }
    Ok(())
}

const CONNECT_ATTEMPTS: u32 = 10;
const BACKOFF_STEP_MS: u64 = 500;
const BACKOFF_CAP_MS: u64 = 5_000;

/// Connect with bounded retries and linearly growing, capped backoff.
/// Retry happens only here at startup; steady-state queries fail fast.
pub async fn connect_pool(database_url: &str) -> Result<PgPool, AppError> {
    let options = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(300));
    let mut last_err: Option<sqlx::Error> = None;
    for attempt in 1..=CONNECT_ATTEMPTS {
        match options.clone().connect(database_url).await {
            Ok(pool) => return Ok(pool),
            Err(e) => {
                let wait = (u64::from(attempt) * BACKOFF_STEP_MS).min(BACKOFF_CAP_MS);
                tracing::warn!(attempt, wait_ms = wait, error = %e, "database not ready");
                last_err = Some(e);
                tokio::time::sleep(Duration::from_millis(wait)).await;
            }
        }
    }
    Err(AppError::Internal(format!(
        "database unreachable after {} attempts: {}",
        CONNECT_ATTEMPTS,
        last_err.map(|e| e.to_string()).unwrap_or_else(|| "unknown".into())
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_unique_and_ascending() {
        for pair in MIGRATIONS.windows(2) {
            assert!(pair[0].version < pair[1].version);
        }
    }

    #[test]
    fn checksum_is_stable_hex() {
        let a = checksum("CREATE TABLE t (id INT)");
        let b = checksum("CREATE TABLE t (id INT)");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, checksum("CREATE TABLE t (id BIGINT)"));
    }
}
