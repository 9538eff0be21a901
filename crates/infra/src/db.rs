//! Postgres connection pool and embedded schema.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tracing::{debug, info};

use crate::store::{StoreError, StoreResult};

const MIGRATIONS: &[(&str, &str)] = &[(
    "001_initial",
    include_str!("../migrations/postgres/001_initial.sql"),
)];

#[derive(Debug, Clone)]
pub struct Database {
    pool: Arc<PgPool>,
}

impl Database {
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let options = PgConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::backend("parsing database url", e.to_string()))?;

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(options)
            .await
            .map_err(|e| StoreError::backend("connecting", e.to_string()))?;

        Ok(Self { pool: Arc::new(pool) })
    }

    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Apply the embedded schema. Statements are idempotent.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        for (name, sql) in MIGRATIONS {
            info!(migration = name, "applying migration");
            for statement in split_statements(sql) {
                debug!(migration = name, statement = %statement, "executing");
                sqlx::query(&statement)
                    .execute(&*self.pool)
                    .await
                    .map_err(|e| StoreError::backend("running migrations", format!("{name}: {e}")))?;
            }
        }
        Ok(())
    }
}

/// Split a script on `;`, dropping `--` comment lines and empty statements.
fn split_statements(sql: &str) -> Vec<String> {
    let without_comments: String = sql
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");

    without_comments
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
