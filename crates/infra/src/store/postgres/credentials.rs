use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use imobcrm_core::TenantId;

use super::map_sqlx_error;
use crate::store::{CredentialRepository, StoreResult, StoredCredential};

struct CredentialRow(StoredCredential);

impl<'r> sqlx::FromRow<'r, PgRow> for CredentialRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(CredentialRow(StoredCredential {
            tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
            provider: row.try_get("provider")?,
            access_token: row.try_get("access_token")?,
            refresh_token: row.try_get("refresh_token")?,
            expires_at: row.try_get("expires_at")?,
            metadata: row.try_get("metadata")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }
}

/// Ciphertexts only ever reach this repository; it never sees plaintext.
pub struct PostgresCredentialRepository {
    pool: Arc<PgPool>,
}

impl PostgresCredentialRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialRepository for PostgresCredentialRepository {
    #[instrument(skip(self, row), fields(tenant_id = %row.tenant_id, provider = %row.provider))]
    async fn upsert(&self, row: &StoredCredential) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO integration_credentials (
                tenant_id, provider, access_token, refresh_token, expires_at, metadata,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (tenant_id, provider) DO UPDATE SET
                access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                expires_at = EXCLUDED.expires_at,
                metadata = EXCLUDED.metadata,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(*row.tenant_id.as_uuid())
        .bind(&row.provider)
        .bind(&row.access_token)
        .bind(&row.refresh_token)
        .bind(row.expires_at)
        .bind(&row.metadata)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("saving credentials", e))?;
        Ok(())
    }

    async fn get(&self, tenant_id: TenantId, provider: &str) -> StoreResult<Option<StoredCredential>> {
        let row = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT tenant_id, provider, access_token, refresh_token, expires_at, metadata,
                   created_at, updated_at
            FROM integration_credentials
            WHERE tenant_id = $1 AND provider = $2
            "#,
        )
        .bind(*tenant_id.as_uuid())
        .bind(provider)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("loading credentials", e))?;
        Ok(row.map(|r| r.0))
    }

    async fn delete(&self, tenant_id: TenantId, provider: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM integration_credentials WHERE tenant_id = $1 AND provider = $2")
            .bind(*tenant_id.as_uuid())
            .bind(provider)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("deleting credentials", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_expiring(
        &self,
        provider: &str,
        before: DateTime<Utc>,
        max_failures: u32,
        limit: u32,
    ) -> StoreResult<Vec<StoredCredential>> {
        let rows = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT tenant_id, provider, access_token, refresh_token, expires_at, metadata,
                   created_at, updated_at
            FROM integration_credentials
            WHERE provider = $1 AND expires_at <= $2
              AND COALESCE((metadata->>'renewal_failures')::bigint, 0) < $3
            ORDER BY expires_at
            LIMIT $4
            "#,
        )
        .bind(provider)
        .bind(before)
        .bind(i64::from(max_failures))
        .bind(i64::from(limit))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("listing expiring credentials", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::postgres::test_db;
    use chrono::Duration;

    fn credential(tenant_id: TenantId, expires_in: Duration, failures: u64) -> StoredCredential {
        let now = Utc::now();
        StoredCredential {
            tenant_id,
            provider: "canalpro".into(),
            access_token: "enc-access".into(),
            refresh_token: Some("enc-refresh".into()),
            expires_at: now + expires_in,
            metadata: serde_json::json!({ "renewal_failures": failures }),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn exhausted_credentials_are_not_listed_for_renewal() {
        let Some(db) = test_db::database().await else { return };
        let repo = PostgresCredentialRepository::new(db.pool());
        let healthy = test_db::tenant(&db).await;
        let exhausted = test_db::tenant(&db).await;
        repo.upsert(&credential(healthy, Duration::minutes(5), 1)).await.unwrap();
        repo.upsert(&credential(exhausted, Duration::minutes(1), 3)).await.unwrap();

        let due = repo
            .list_expiring("canalpro", Utc::now() + Duration::minutes(10), 3, 1000)
            .await
            .unwrap();
        let tenants: Vec<TenantId> = due.iter().map(|c| c.tenant_id).collect();
        assert!(tenants.contains(&healthy));
        assert!(!tenants.contains(&exhausted));
    }

    #[tokio::test]
    async fn credentials_are_scoped_to_their_tenant() {
        let Some(db) = test_db::database().await else { return };
        let repo = PostgresCredentialRepository::new(db.pool());
        let owner = test_db::tenant(&db).await;
        let intruder = test_db::tenant(&db).await;
        repo.upsert(&credential(owner, Duration::hours(1), 0)).await.unwrap();

        assert!(repo.get(intruder, "canalpro").await.unwrap().is_none());
        assert!(!repo.delete(intruder, "canalpro").await.unwrap());
        let stored = repo.get(owner, "canalpro").await.unwrap().unwrap();
        assert_eq!(stored.access_token, "enc-access");
        assert!(repo.delete(owner, "canalpro").await.unwrap());
    }
}
