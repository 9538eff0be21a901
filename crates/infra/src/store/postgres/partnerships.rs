use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use imobcrm_core::{PartnershipId, TenantId};
use imobcrm_tenancy::{Partnership, SharedProperty};

use super::{get_text, map_sqlx_error};
use crate::store::{PartnershipRepository, StoreError, StoreResult};

const COLUMNS: &str = "id, requester_tenant_id, partner_tenant_id, status, message, shared, \
                       created_at, responded_at, updated_at";

struct PartnershipRow(Partnership);

impl<'r> sqlx::FromRow<'r, PgRow> for PartnershipRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(PartnershipRow(Partnership {
            id: PartnershipId::from_uuid(row.try_get("id")?),
            requester_tenant_id: TenantId::from_uuid(row.try_get("requester_tenant_id")?),
            partner_tenant_id: TenantId::from_uuid(row.try_get("partner_tenant_id")?),
            status: get_text(row, "status")?,
            message: row.try_get("message")?,
            shared: row.try_get::<Json<Vec<SharedProperty>>, _>("shared")?.0,
            created_at: row.try_get("created_at")?,
            responded_at: row.try_get("responded_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }
}

pub struct PostgresPartnershipRepository {
    pool: Arc<PgPool>,
}

impl PostgresPartnershipRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PartnershipRepository for PostgresPartnershipRepository {
    async fn insert(&self, p: &Partnership) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO partnerships (
                id, requester_tenant_id, partner_tenant_id, status, message, shared,
                created_at, responded_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(*p.id.as_uuid())
        .bind(*p.requester_tenant_id.as_uuid())
        .bind(*p.partner_tenant_id.as_uuid())
        .bind(p.status.as_str())
        .bind(&p.message)
        .bind(Json(&p.shared))
        .bind(p.created_at)
        .bind(p.responded_at)
        .bind(p.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("inserting partnership", e))?;
        Ok(())
    }

    async fn update(&self, p: &Partnership) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE partnerships SET
                status = $2, message = $3, shared = $4, responded_at = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(*p.id.as_uuid())
        .bind(p.status.as_str())
        .bind(&p.message)
        .bind(Json(&p.shared))
        .bind(p.responded_at)
        .bind(p.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("updating partnership", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("partnership"));
        }
        Ok(())
    }

    async fn get(&self, tenant_id: TenantId, id: PartnershipId) -> StoreResult<Option<Partnership>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM partnerships \
             WHERE id = $2 AND (requester_tenant_id = $1 OR partner_tenant_id = $1)"
        );
        let row = sqlx::query_as::<_, PartnershipRow>(&sql)
            .bind(*tenant_id.as_uuid())
            .bind(*id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("loading partnership", e))?;
        Ok(row.map(|r| r.0))
    }

    async fn list_for(&self, tenant_id: TenantId) -> StoreResult<Vec<Partnership>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM partnerships \
             WHERE requester_tenant_id = $1 OR partner_tenant_id = $1 \
             ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query_as::<_, PartnershipRow>(&sql)
            .bind(*tenant_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("listing partnerships", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn find_open_between(&self, a: TenantId, b: TenantId) -> StoreResult<Option<Partnership>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM partnerships \
             WHERE ((requester_tenant_id = $1 AND partner_tenant_id = $2) \
                 OR (requester_tenant_id = $2 AND partner_tenant_id = $1)) \
               AND status IN ('pending', 'accepted') \
             LIMIT 1"
        );
        let row = sqlx::query_as::<_, PartnershipRow>(&sql)
            .bind(*a.as_uuid())
            .bind(*b.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("finding partnership", e))?;
        Ok(row.map(|r| r.0))
    }
}
