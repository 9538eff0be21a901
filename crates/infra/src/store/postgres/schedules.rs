use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use imobcrm_core::{PropertyId, ScheduleId, TenantId};
use imobcrm_scheduling::{Frequency, RefreshSchedule, ScheduleTarget};

use super::{get_u32, map_sqlx_error, to_i32};
use crate::store::{ScheduleRepository, StoreError, StoreResult};

const TARGET_PROPERTIES: &str = "properties";
const TARGET_ALL_PUBLISHED: &str = "all_published";

const SELECT: &str = r#"
    SELECT s.id, s.tenant_id, s.name, s.time_slot, s.utc_offset_minutes, s.frequency,
           s.target_kind, s.is_active, s.is_running, s.running_since, s.next_run, s.last_run,
           s.total_runs, s.successful_runs, s.failed_runs, s.created_at, s.updated_at,
           ARRAY(
               SELECT m.property_id FROM property_refresh_schedules m
               WHERE m.schedule_id = s.id ORDER BY m.position
           ) AS property_ids
    FROM refresh_schedules s
"#;

struct ScheduleRow(RefreshSchedule);

impl<'r> sqlx::FromRow<'r, PgRow> for ScheduleRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let target_kind: String = row.try_get("target_kind")?;
        let target = match target_kind.as_str() {
            TARGET_ALL_PUBLISHED => ScheduleTarget::AllPublished,
            _ => {
                let ids: Vec<Uuid> = row.try_get("property_ids")?;
                ScheduleTarget::Properties {
                    property_ids: ids.into_iter().map(PropertyId::from_uuid).collect(),
                }
            }
        };

        Ok(ScheduleRow(RefreshSchedule {
            id: ScheduleId::from_uuid(row.try_get("id")?),
            tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
            name: row.try_get("name")?,
            time_slot: row.try_get("time_slot")?,
            utc_offset_minutes: row.try_get("utc_offset_minutes")?,
            frequency: row.try_get::<Json<Frequency>, _>("frequency")?.0,
            target,
            is_active: row.try_get("is_active")?,
            is_running: row.try_get("is_running")?,
            running_since: row.try_get("running_since")?,
            next_run: row.try_get("next_run")?,
            last_run: row.try_get("last_run")?,
            total_runs: get_u32(row, "total_runs")?,
            successful_runs: get_u32(row, "successful_runs")?,
            failed_runs: get_u32(row, "failed_runs")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }
}

fn target_kind(target: &ScheduleTarget) -> &'static str {
    match target {
        ScheduleTarget::Properties { .. } => TARGET_PROPERTIES,
        ScheduleTarget::AllPublished => TARGET_ALL_PUBLISHED,
    }
}

pub struct PostgresScheduleRepository {
    pool: Arc<PgPool>,
}

impl PostgresScheduleRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    async fn replace_members(
        tx: &mut Transaction<'_, Postgres>,
        schedule: &RefreshSchedule,
    ) -> StoreResult<()> {
        sqlx::query("DELETE FROM property_refresh_schedules WHERE tenant_id = $1 AND schedule_id = $2")
            .bind(*schedule.tenant_id.as_uuid())
            .bind(*schedule.id.as_uuid())
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("clearing schedule members", e))?;

        let Some(ids) = schedule.explicit_properties() else {
            return Ok(());
        };
        let property_ids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let positions: Vec<i32> = (0..property_ids.len()).map(|i| to_i32(i as u32)).collect();

        sqlx::query(
            r#"
            INSERT INTO property_refresh_schedules (schedule_id, property_id, tenant_id, position)
            SELECT $1, m.property_id, $2, m.position
            FROM UNNEST($3::UUID[], $4::INTEGER[]) AS m(property_id, position)
            "#,
        )
        .bind(*schedule.id.as_uuid())
        .bind(*schedule.tenant_id.as_uuid())
        .bind(&property_ids)
        .bind(&positions)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("writing schedule members", e))?;
        Ok(())
    }

    /// Apply `change` to the row under `SELECT ... FOR UPDATE` and write back
    /// the run state when it reports a change.
    ///
    /// The row lock serializes this with `try_claim`.
    async fn change_run_state<F>(
        &self,
        tenant_id: TenantId,
        id: ScheduleId,
        operation: &'static str,
        change: F,
    ) -> StoreResult<Option<RefreshSchedule>>
    where
        F: FnOnce(&mut RefreshSchedule) -> bool + Send,
    {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("beginning transaction", e))?;

        let sql = format!("{SELECT} WHERE s.tenant_id = $1 AND s.id = $2 FOR UPDATE OF s");
        let row = sqlx::query_as::<_, ScheduleRow>(&sql)
            .bind(*tenant_id.as_uuid())
            .bind(*id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        let Some(ScheduleRow(mut schedule)) = row else {
            return Ok(None);
        };
        if !change(&mut schedule) {
            return Ok(None);
        }

        sqlx::query(
            r#"
            UPDATE refresh_schedules SET
                is_running = $3, running_since = $4, next_run = $5, last_run = $6,
                total_runs = $7, successful_runs = $8, failed_runs = $9, updated_at = $10
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(*tenant_id.as_uuid())
        .bind(*id.as_uuid())
        .bind(schedule.is_running)
        .bind(schedule.running_since)
        .bind(schedule.next_run)
        .bind(schedule.last_run)
        .bind(to_i32(schedule.total_runs))
        .bind(to_i32(schedule.successful_runs))
        .bind(to_i32(schedule.failed_runs))
        .bind(schedule.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;

        tx.commit().await.map_err(|e| map_sqlx_error(operation, e))?;
        Ok(Some(schedule))
    }
}

#[async_trait]
impl ScheduleRepository for PostgresScheduleRepository {
    #[instrument(skip(self, s), fields(tenant_id = %s.tenant_id, schedule_id = %s.id))]
    async fn insert(&self, s: &RefreshSchedule) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("beginning transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO refresh_schedules (
                id, tenant_id, name, time_slot, utc_offset_minutes, frequency, target_kind,
                is_active, is_running, running_since, next_run, last_run, total_runs,
                successful_runs, failed_runs, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(*s.id.as_uuid())
        .bind(*s.tenant_id.as_uuid())
        .bind(&s.name)
        .bind(s.time_slot)
        .bind(s.utc_offset_minutes)
        .bind(Json(&s.frequency))
        .bind(target_kind(&s.target))
        .bind(s.is_active)
        .bind(s.is_running)
        .bind(s.running_since)
        .bind(s.next_run)
        .bind(s.last_run)
        .bind(to_i32(s.total_runs))
        .bind(to_i32(s.successful_runs))
        .bind(to_i32(s.failed_runs))
        .bind(s.created_at)
        .bind(s.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("inserting schedule", e))?;

        Self::replace_members(&mut tx, s).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("committing schedule", e))
    }

    #[instrument(skip(self, s), fields(tenant_id = %s.tenant_id, schedule_id = %s.id))]
    async fn update(&self, s: &RefreshSchedule) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("beginning transaction", e))?;

        let result = sqlx::query(
            r#"
            UPDATE refresh_schedules SET
                name = $3, time_slot = $4, utc_offset_minutes = $5, frequency = $6,
                target_kind = $7, is_active = $8, next_run = $9, updated_at = $10
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(*s.tenant_id.as_uuid())
        .bind(*s.id.as_uuid())
        .bind(&s.name)
        .bind(s.time_slot)
        .bind(s.utc_offset_minutes)
        .bind(Json(&s.frequency))
        .bind(target_kind(&s.target))
        .bind(s.is_active)
        .bind(s.next_run)
        .bind(s.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("updating schedule", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("schedule"));
        }

        Self::replace_members(&mut tx, s).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("committing schedule", e))
    }

    async fn get(&self, tenant_id: TenantId, id: ScheduleId) -> StoreResult<Option<RefreshSchedule>> {
        let sql = format!("{SELECT} WHERE s.tenant_id = $1 AND s.id = $2");
        let row = sqlx::query_as::<_, ScheduleRow>(&sql)
            .bind(*tenant_id.as_uuid())
            .bind(*id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("loading schedule", e))?;
        Ok(row.map(|r| r.0))
    }

    async fn list(&self, tenant_id: TenantId) -> StoreResult<Vec<RefreshSchedule>> {
        let sql = format!("{SELECT} WHERE s.tenant_id = $1 ORDER BY s.created_at, s.id");
        let rows = sqlx::query_as::<_, ScheduleRow>(&sql)
            .bind(*tenant_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("listing schedules", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn delete(&self, tenant_id: TenantId, id: ScheduleId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM refresh_schedules WHERE tenant_id = $1 AND id = $2")
            .bind(*tenant_id.as_uuid())
            .bind(*id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("deleting schedule", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self, tenant_id: TenantId) -> StoreResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM refresh_schedules WHERE tenant_id = $1")
            .bind(*tenant_id.as_uuid())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("counting schedules", e))?;
        let n: i64 = row.try_get("n").map_err(|e| map_sqlx_error("counting schedules", e))?;
        Ok(n.max(0) as u64)
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: u32) -> StoreResult<Vec<RefreshSchedule>> {
        let sql = format!(
            "{SELECT} WHERE s.is_active AND NOT s.is_running AND s.next_run <= $1 \
             ORDER BY s.next_run, s.id LIMIT $2"
        );
        let rows = sqlx::query_as::<_, ScheduleRow>(&sql)
            .bind(now)
            .bind(i64::from(limit))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("listing due schedules", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn list_stale(&self, running_before: DateTime<Utc>) -> StoreResult<Vec<RefreshSchedule>> {
        let sql = format!("{SELECT} WHERE s.is_running AND s.running_since <= $1");
        let rows = sqlx::query_as::<_, ScheduleRow>(&sql)
            .bind(running_before)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("listing stale schedules", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, schedule_id = %id))]
    async fn try_claim(
        &self,
        tenant_id: TenantId,
        id: ScheduleId,
        now: DateTime<Utc>,
        due_only: bool,
    ) -> StoreResult<Option<RefreshSchedule>> {
        let claimed = sqlx::query(
            r#"
            UPDATE refresh_schedules
            SET is_running = TRUE, running_since = $3, updated_at = $3
            WHERE tenant_id = $1 AND id = $2 AND is_active AND NOT is_running
              AND (NOT $4 OR next_run <= $3)
            "#,
        )
        .bind(*tenant_id.as_uuid())
        .bind(*id.as_uuid())
        .bind(now)
        .bind(due_only)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("claiming schedule", e))?;

        if claimed.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(tenant_id, id).await
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, schedule_id = %id))]
    async fn finish_run(
        &self,
        tenant_id: TenantId,
        id: ScheduleId,
        now: DateTime<Utc>,
        success: bool,
    ) -> StoreResult<Option<RefreshSchedule>> {
        self.change_run_state(tenant_id, id, "finishing schedule run", |s| {
            if !s.is_running {
                return false;
            }
            s.finish_run(now, success);
            true
        })
        .await
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, schedule_id = %id))]
    async fn recover_stale(
        &self,
        tenant_id: TenantId,
        id: ScheduleId,
        now: DateTime<Utc>,
        stale_after: chrono::Duration,
    ) -> StoreResult<Option<RefreshSchedule>> {
        self.change_run_state(tenant_id, id, "recovering stale schedule", |s| {
            s.recover_if_stale(now, stale_after)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::postgres::test_db;
    use chrono::{Duration, NaiveTime};
    use imobcrm_scheduling::ScheduleDraft;

    fn overdue(tenant_id: TenantId) -> RefreshSchedule {
        let created = Utc::now() - Duration::hours(2);
        RefreshSchedule::new(
            tenant_id,
            ScheduleDraft {
                name: "hourly".into(),
                time_slot: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                utc_offset_minutes: -180,
                frequency: Frequency::EveryHours { hours: 1 },
                target: ScheduleTarget::AllPublished,
                is_active: true,
            },
            created,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn claim_is_exclusive_until_finished() {
        let Some(db) = test_db::database().await else { return };
        let repo = PostgresScheduleRepository::new(db.pool());
        let tenant = test_db::tenant(&db).await;
        let s = overdue(tenant);
        repo.insert(&s).await.unwrap();
        let now = Utc::now();

        assert!(repo.try_claim(tenant, s.id, now, true).await.unwrap().is_some());
        assert!(repo.try_claim(tenant, s.id, now, false).await.unwrap().is_none());

        let finished = repo.finish_run(tenant, s.id, now, true).await.unwrap().unwrap();
        assert!(!finished.is_running);
        assert_eq!(finished.successful_runs, 1);
        assert!(repo.finish_run(tenant, s.id, now, true).await.unwrap().is_none());
        assert!(repo.try_claim(tenant, s.id, now, false).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn configuration_writes_keep_the_claim() {
        let Some(db) = test_db::database().await else { return };
        let repo = PostgresScheduleRepository::new(db.pool());
        let tenant = test_db::tenant(&db).await;
        let mut snapshot = overdue(tenant);
        repo.insert(&snapshot).await.unwrap();
        let now = Utc::now();

        repo.try_claim(tenant, snapshot.id, now, false).await.unwrap().unwrap();
        snapshot.name = "renamed".into();
        repo.update(&snapshot).await.unwrap();

        let stored = repo.get(tenant, snapshot.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "renamed");
        assert!(stored.is_running);
        assert!(repo.try_claim(tenant, snapshot.id, now, false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn other_tenants_cannot_touch_a_schedule() {
        let Some(db) = test_db::database().await else { return };
        let repo = PostgresScheduleRepository::new(db.pool());
        let owner = test_db::tenant(&db).await;
        let intruder = test_db::tenant(&db).await;
        let s = overdue(owner);
        repo.insert(&s).await.unwrap();
        let now = Utc::now();

        assert!(repo.get(intruder, s.id).await.unwrap().is_none());
        assert!(repo.try_claim(intruder, s.id, now, false).await.unwrap().is_none());
        assert!(repo.finish_run(intruder, s.id, now, false).await.unwrap().is_none());
        assert!(!repo.delete(intruder, s.id).await.unwrap());
        assert!(repo.delete(owner, s.id).await.unwrap());
    }
}
