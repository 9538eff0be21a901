//! sqlx/Postgres repositories.
//!
//! Enums are stored as their text codes, nested value objects as JSONB.
//! Every tenant-scoped statement filters on `tenant_id`.

use std::fmt::Display;
use std::str::FromStr;

use sqlx::Row;
use sqlx::postgres::PgRow;

use super::StoreError;

mod accounts;
mod credentials;
mod partnerships;
mod properties;
mod refresh_log;
mod schedules;

pub use accounts::{PostgresSubscriptionRepository, PostgresTenantRepository, PostgresUserRepository};
pub use credentials::PostgresCredentialRepository;
pub use partnerships::PostgresPartnershipRepository;
pub use properties::PostgresPropertyRepository;
pub use refresh_log::PostgresRefreshLogRepository;
pub use schedules::PostgresScheduleRepository;

#[cfg(test)]
pub(crate) mod test_db {
    use chrono::Utc;
    use imobcrm_core::TenantId;
    use imobcrm_tenancy::Tenant;

    use super::PostgresTenantRepository;
    use crate::db::Database;
    use crate::store::TenantRepository;

    /// Migrated database at `DATABASE_URL`, or `None` when it is unset.
    pub async fn database() -> Option<Database> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let db = Database::connect(&url).await.expect("connect");
        db.run_migrations().await.expect("migrate");
        Some(db)
    }

    pub async fn tenant(db: &Database) -> TenantId {
        let name = format!("Imobiliaria {}", TenantId::new());
        let tenant = Tenant::create(&name, Utc::now()).expect("valid tenant");
        PostgresTenantRepository::new(db.pool())
            .insert(&tenant)
            .await
            .expect("insert tenant");
        tenant.id
    }
}

pub(crate) fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = db_err.message().to_string();
            match db_err.code().as_deref() {
                // unique violation
                Some("23505") => StoreError::conflict(operation, msg),
                // foreign key violation
                Some("23503") => StoreError::not_found("referenced row"),
                _ => StoreError::backend(operation, msg),
            }
        }
        sqlx::Error::RowNotFound => StoreError::not_found("row"),
        other => StoreError::backend(operation, other.to_string()),
    }
}

fn decode_error(column: &str, source: impl std::error::Error + Send + Sync + 'static) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(source),
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct TextDecodeError(String);

/// Read a text column and parse it with `FromStr`.
pub(crate) fn get_text<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|e: T::Err| decode_error(column, TextDecodeError(e.to_string())))
}

pub(crate) fn get_u32(row: &PgRow, column: &str) -> Result<u32, sqlx::Error> {
    let raw: i32 = row.try_get(column)?;
    u32::try_from(raw).map_err(|e| decode_error(column, e))
}

pub(crate) fn get_opt_u32(row: &PgRow, column: &str) -> Result<Option<u32>, sqlx::Error> {
    let raw: Option<i32> = row.try_get(column)?;
    raw.map(|v| u32::try_from(v).map_err(|e| decode_error(column, e)))
        .transpose()
}

pub(crate) fn to_i32(v: u32) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}

pub(crate) fn to_opt_i32(v: Option<u32>) -> Option<i32> {
    v.map(to_i32)
}
