use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use imobcrm_core::{PropertyId, TenantId};
use imobcrm_listings::{Address, MediaItem, Money, Property};

use super::{get_opt_u32, get_text, map_sqlx_error, to_opt_i32};
use crate::store::{PropertyFilter, PropertyRepository, StoreError, StoreResult};

const COLUMNS: &str = r#"
    id, tenant_id, reference_code, title, description, business_type, property_type,
    usage, publication_type, status, address, sale_price_cents, rental_price_cents,
    condo_fee_cents, property_tax_cents, bedrooms, suites, bathrooms, parking_spaces,
    usable_area, total_area, floor, amenities, media, external_id, sync_status,
    sync_error, last_synced_at, published_at, created_at, updated_at
"#;

struct PropertyRow(Property);

impl<'r> sqlx::FromRow<'r, PgRow> for PropertyRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let money = |column: &str| -> Result<Option<Money>, sqlx::Error> {
            Ok(row.try_get::<Option<i64>, _>(column)?.map(Money::from_cents))
        };

        Ok(PropertyRow(Property {
            id: PropertyId::from_uuid(row.try_get("id")?),
            tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
            reference_code: row.try_get("reference_code")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            business_type: get_text(row, "business_type")?,
            property_type: get_text(row, "property_type")?,
            usage: get_text(row, "usage")?,
            publication_type: get_text(row, "publication_type")?,
            status: get_text(row, "status")?,
            address: row.try_get::<Json<Address>, _>("address")?.0,
            sale_price: money("sale_price_cents")?,
            rental_price: money("rental_price_cents")?,
            condo_fee: money("condo_fee_cents")?,
            property_tax: money("property_tax_cents")?,
            bedrooms: get_opt_u32(row, "bedrooms")?,
            suites: get_opt_u32(row, "suites")?,
            bathrooms: get_opt_u32(row, "bathrooms")?,
            parking_spaces: get_opt_u32(row, "parking_spaces")?,
            usable_area: row.try_get("usable_area")?,
            total_area: row.try_get("total_area")?,
            floor: row.try_get("floor")?,
            amenities: row.try_get("amenities")?,
            media: row.try_get::<Json<Vec<MediaItem>>, _>("media")?.0,
            external_id: row.try_get("external_id")?,
            sync_status: get_text(row, "sync_status")?,
            sync_error: row.try_get("sync_error")?,
            last_synced_at: row.try_get("last_synced_at")?,
            published_at: row.try_get("published_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }
}

pub struct PostgresPropertyRepository {
    pool: Arc<PgPool>,
}

impl PostgresPropertyRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PropertyRepository for PostgresPropertyRepository {
    #[instrument(skip(self, p), fields(tenant_id = %p.tenant_id, property_id = %p.id))]
    async fn insert(&self, p: &Property) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO properties (
                id, tenant_id, reference_code, title, description, business_type, property_type,
                usage, publication_type, status, address, sale_price_cents, rental_price_cents,
                condo_fee_cents, property_tax_cents, bedrooms, suites, bathrooms, parking_spaces,
                usable_area, total_area, floor, amenities, media, external_id, sync_status,
                sync_error, last_synced_at, published_at, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31
            )
            "#,
        )
        .bind(*p.id.as_uuid())
        .bind(*p.tenant_id.as_uuid())
        .bind(&p.reference_code)
        .bind(&p.title)
        .bind(&p.description)
        .bind(p.business_type.as_str())
        .bind(p.property_type.as_str())
        .bind(p.usage.as_str())
        .bind(p.publication_type.as_str())
        .bind(p.status.as_str())
        .bind(Json(&p.address))
        .bind(p.sale_price.map(|m| m.cents()))
        .bind(p.rental_price.map(|m| m.cents()))
        .bind(p.condo_fee.map(|m| m.cents()))
        .bind(p.property_tax.map(|m| m.cents()))
        .bind(to_opt_i32(p.bedrooms))
        .bind(to_opt_i32(p.suites))
        .bind(to_opt_i32(p.bathrooms))
        .bind(to_opt_i32(p.parking_spaces))
        .bind(p.usable_area)
        .bind(p.total_area)
        .bind(p.floor)
        .bind(&p.amenities)
        .bind(Json(&p.media))
        .bind(&p.external_id)
        .bind(p.sync_status.as_str())
        .bind(&p.sync_error)
        .bind(p.last_synced_at)
        .bind(p.published_at)
        .bind(p.created_at)
        .bind(p.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("inserting property", e))?;
        Ok(())
    }

    #[instrument(skip(self, p), fields(tenant_id = %p.tenant_id, property_id = %p.id))]
    async fn update(&self, p: &Property) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE properties SET
                reference_code = $3, title = $4, description = $5, business_type = $6,
                property_type = $7, usage = $8, publication_type = $9, status = $10,
                address = $11, sale_price_cents = $12, rental_price_cents = $13,
                condo_fee_cents = $14, property_tax_cents = $15, bedrooms = $16, suites = $17,
                bathrooms = $18, parking_spaces = $19, usable_area = $20, total_area = $21,
                floor = $22, amenities = $23, media = $24, external_id = $25, sync_status = $26,
                sync_error = $27, last_synced_at = $28, published_at = $29, updated_at = $30
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(*p.tenant_id.as_uuid())
        .bind(*p.id.as_uuid())
        .bind(&p.reference_code)
        .bind(&p.title)
        .bind(&p.description)
        .bind(p.business_type.as_str())
        .bind(p.property_type.as_str())
        .bind(p.usage.as_str())
        .bind(p.publication_type.as_str())
        .bind(p.status.as_str())
        .bind(Json(&p.address))
        .bind(p.sale_price.map(|m| m.cents()))
        .bind(p.rental_price.map(|m| m.cents()))
        .bind(p.condo_fee.map(|m| m.cents()))
        .bind(p.property_tax.map(|m| m.cents()))
        .bind(to_opt_i32(p.bedrooms))
        .bind(to_opt_i32(p.suites))
        .bind(to_opt_i32(p.bathrooms))
        .bind(to_opt_i32(p.parking_spaces))
        .bind(p.usable_area)
        .bind(p.total_area)
        .bind(p.floor)
        .bind(&p.amenities)
        .bind(Json(&p.media))
        .bind(&p.external_id)
        .bind(p.sync_status.as_str())
        .bind(&p.sync_error)
        .bind(p.last_synced_at)
        .bind(p.published_at)
        .bind(p.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("updating property", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("property"));
        }
        Ok(())
    }

    async fn update_sync(&self, p: &Property) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE properties SET
                external_id = $3,
                sync_status = CASE
                    WHEN sync_status = 'outdated' AND $4 = 'synced' THEN sync_status
                    ELSE $4
                END,
                sync_error = $5, last_synced_at = $6, published_at = $7,
                updated_at = GREATEST(updated_at, $8)
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(*p.tenant_id.as_uuid())
        .bind(*p.id.as_uuid())
        .bind(&p.external_id)
        .bind(p.sync_status.as_str())
        .bind(&p.sync_error)
        .bind(p.last_synced_at)
        .bind(p.published_at)
        .bind(p.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("updating property sync state", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("property"));
        }
        Ok(())
    }

    async fn get(&self, tenant_id: TenantId, id: PropertyId) -> StoreResult<Option<Property>> {
        let sql = format!("SELECT {COLUMNS} FROM properties WHERE tenant_id = $1 AND id = $2");
        let row = sqlx::query_as::<_, PropertyRow>(&sql)
            .bind(*tenant_id.as_uuid())
            .bind(*id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("loading property", e))?;
        Ok(row.map(|r| r.0))
    }

    async fn list(&self, tenant_id: TenantId, filter: &PropertyFilter) -> StoreResult<Vec<Property>> {
        let sql = format!(
            r#"
            SELECT {COLUMNS} FROM properties
            WHERE tenant_id = $1
              AND ($2::TEXT IS NULL OR status = $2)
              AND ($3::TEXT IS NULL OR sync_status = $3)
              AND (NOT $4 OR external_id IS NOT NULL)
            ORDER BY created_at DESC, id DESC
            LIMIT $5 OFFSET $6
            "#
        );
        let rows = sqlx::query_as::<_, PropertyRow>(&sql)
            .bind(*tenant_id.as_uuid())
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.sync_status.map(|s| s.as_str()))
            .bind(filter.published_only)
            .bind(filter.limit.map(i64::from))
            .bind(i64::from(filter.offset))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("listing properties", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn list_by_ids(&self, tenant_id: TenantId, ids: &[PropertyId]) -> StoreResult<Vec<Property>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let sql = format!("SELECT {COLUMNS} FROM properties WHERE tenant_id = $1 AND id = ANY($2)");
        let rows = sqlx::query_as::<_, PropertyRow>(&sql)
            .bind(*tenant_id.as_uuid())
            .bind(&uuids)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("listing properties by id", e))?;

        // Keep the caller's order.
        let mut found: Vec<Property> = rows.into_iter().map(|r| r.0).collect();
        found.sort_by_key(|p| ids.iter().position(|id| *id == p.id));
        Ok(found)
    }

    async fn find_by_external_id(&self, tenant_id: TenantId, external_id: &str) -> StoreResult<Option<Property>> {
        let sql = format!("SELECT {COLUMNS} FROM properties WHERE tenant_id = $1 AND external_id = $2");
        let row = sqlx::query_as::<_, PropertyRow>(&sql)
            .bind(*tenant_id.as_uuid())
            .bind(external_id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("loading property by external id", e))?;
        Ok(row.map(|r| r.0))
    }

    async fn delete(&self, tenant_id: TenantId, id: PropertyId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM properties WHERE tenant_id = $1 AND id = $2")
            .bind(*tenant_id.as_uuid())
            .bind(*id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("deleting property", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self, tenant_id: TenantId) -> StoreResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM properties WHERE tenant_id = $1")
            .bind(*tenant_id.as_uuid())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("counting properties", e))?;
        let n: i64 = row.try_get("n").map_err(|e| map_sqlx_error("counting properties", e))?;
        Ok(n.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::postgres::test_db;
    use crate::testing::active_property;
    use chrono::Utc;
    use imobcrm_listings::{PropertyPatch, SyncStatus};

    #[tokio::test]
    async fn sync_writes_leave_content_alone() {
        let Some(db) = test_db::database().await else { return };
        let repo = PostgresPropertyRepository::new(db.pool());
        let tenant = test_db::tenant(&db).await;
        let now = Utc::now();

        let mut snapshot = active_property(tenant);
        snapshot.mark_synced(format!("ext-{}", snapshot.id), now);
        repo.insert(&snapshot).await.unwrap();

        let mut edited = snapshot.clone();
        PropertyPatch {
            title: Some("Apartamento reformado".into()),
            ..Default::default()
        }
        .apply(&mut edited, now)
        .unwrap();
        repo.update(&edited).await.unwrap();

        snapshot.mark_synced(format!("ext-{}", snapshot.id), now + chrono::Duration::seconds(5));
        repo.update_sync(&snapshot).await.unwrap();

        let stored = repo.get(tenant, snapshot.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "Apartamento reformado");
        assert_eq!(stored.sync_status, SyncStatus::Outdated);
        assert!(stored.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn rows_are_scoped_to_their_tenant() {
        let Some(db) = test_db::database().await else { return };
        let repo = PostgresPropertyRepository::new(db.pool());
        let owner = test_db::tenant(&db).await;
        let intruder = test_db::tenant(&db).await;

        let p = active_property(owner);
        repo.insert(&p).await.unwrap();

        assert!(repo.get(intruder, p.id).await.unwrap().is_none());
        assert_eq!(repo.count(intruder).await.unwrap(), 0);
        assert!(!repo.delete(intruder, p.id).await.unwrap());

        let mut foreign = p.clone();
        foreign.tenant_id = intruder;
        let err = repo.update_sync(&foreign).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert_eq!(repo.count(owner).await.unwrap(), 1);
    }
}
