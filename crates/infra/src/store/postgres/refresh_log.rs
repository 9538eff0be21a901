use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use imobcrm_core::{PropertyId, RefreshJobId, ScheduleId, TenantId};
use imobcrm_scheduling::{RefreshHistory, RefreshJob};

use super::{get_text, get_u32, map_sqlx_error, to_i32};
use crate::store::{HistoryQuery, RefreshLogRepository, StoreError, StoreResult};

const JOB_COLUMNS: &str = "id, tenant_id, schedule_id, trigger, status, total, succeeded, failed, \
                           skipped, error, created_at, started_at, finished_at";

struct JobRow(RefreshJob);

impl<'r> sqlx::FromRow<'r, PgRow> for JobRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow(RefreshJob {
            id: RefreshJobId::from_uuid(row.try_get("id")?),
            tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
            schedule_id: row.try_get::<Option<Uuid>, _>("schedule_id")?.map(ScheduleId::from_uuid),
            trigger: get_text(row, "trigger")?,
            status: get_text(row, "status")?,
            total: get_u32(row, "total")?,
            succeeded: get_u32(row, "succeeded")?,
            failed: get_u32(row, "failed")?,
            skipped: get_u32(row, "skipped")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        }))
    }
}

struct HistoryRow(RefreshHistory);

impl<'r> sqlx::FromRow<'r, PgRow> for HistoryRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(HistoryRow(RefreshHistory {
            tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
            job_id: row.try_get::<Option<Uuid>, _>("job_id")?.map(RefreshJobId::from_uuid),
            schedule_id: row.try_get::<Option<Uuid>, _>("schedule_id")?.map(ScheduleId::from_uuid),
            property_id: PropertyId::from_uuid(row.try_get("property_id")?),
            status: get_text(row, "status")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            duration_ms: row.try_get("duration_ms")?,
            error: row.try_get("error")?,
        }))
    }
}

pub struct PostgresRefreshLogRepository {
    pool: Arc<PgPool>,
}

impl PostgresRefreshLogRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshLogRepository for PostgresRefreshLogRepository {
    async fn insert_job(&self, job: &RefreshJob) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_jobs (
                id, tenant_id, schedule_id, trigger, status, total, succeeded, failed,
                skipped, error, created_at, started_at, finished_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(*job.id.as_uuid())
        .bind(*job.tenant_id.as_uuid())
        .bind(job.schedule_id.map(|s| *s.as_uuid()))
        .bind(job.trigger.as_str())
        .bind(job.status.as_str())
        .bind(to_i32(job.total))
        .bind(to_i32(job.succeeded))
        .bind(to_i32(job.failed))
        .bind(to_i32(job.skipped))
        .bind(&job.error)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("inserting refresh job", e))?;
        Ok(())
    }

    async fn update_job(&self, job: &RefreshJob) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_jobs SET
                status = $3, succeeded = $4, failed = $5, skipped = $6, error = $7,
                started_at = $8, finished_at = $9
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(*job.tenant_id.as_uuid())
        .bind(*job.id.as_uuid())
        .bind(job.status.as_str())
        .bind(to_i32(job.succeeded))
        .bind(to_i32(job.failed))
        .bind(to_i32(job.skipped))
        .bind(&job.error)
        .bind(job.started_at)
        .bind(job.finished_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("updating refresh job", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("refresh job"));
        }
        Ok(())
    }

    async fn get_job(&self, tenant_id: TenantId, id: RefreshJobId) -> StoreResult<Option<RefreshJob>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM refresh_jobs WHERE tenant_id = $1 AND id = $2");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(*tenant_id.as_uuid())
            .bind(*id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("loading refresh job", e))?;
        Ok(row.map(|r| r.0))
    }

    async fn list_jobs(
        &self,
        tenant_id: TenantId,
        schedule_id: Option<ScheduleId>,
        limit: u32,
    ) -> StoreResult<Vec<RefreshJob>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM refresh_jobs \
             WHERE tenant_id = $1 AND ($2::UUID IS NULL OR schedule_id = $2) \
             ORDER BY created_at DESC, id DESC LIMIT $3"
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(*tenant_id.as_uuid())
            .bind(schedule_id.map(|s| *s.as_uuid()))
            .bind(i64::from(limit))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("listing refresh jobs", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn append_history(&self, row: &RefreshHistory) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_history (
                tenant_id, job_id, schedule_id, property_id, status, started_at,
                finished_at, duration_ms, error
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(*row.tenant_id.as_uuid())
        .bind(row.job_id.map(|j| *j.as_uuid()))
        .bind(row.schedule_id.map(|s| *s.as_uuid()))
        .bind(*row.property_id.as_uuid())
        .bind(row.status.as_str())
        .bind(row.started_at)
        .bind(row.finished_at)
        .bind(row.duration_ms)
        .bind(&row.error)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("appending refresh history", e))?;
        Ok(())
    }

    async fn list_history(&self, tenant_id: TenantId, query: &HistoryQuery) -> StoreResult<Vec<RefreshHistory>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT tenant_id, job_id, schedule_id, property_id, status, started_at,
                   finished_at, duration_ms, error
            FROM refresh_history
            WHERE tenant_id = $1
              AND ($2::UUID IS NULL OR schedule_id = $2)
              AND ($3::UUID IS NULL OR job_id = $3)
              AND ($4::UUID IS NULL OR property_id = $4)
            ORDER BY id DESC
            LIMIT $5
            "#,
        )
        .bind(*tenant_id.as_uuid())
        .bind(query.schedule_id.map(|s| *s.as_uuid()))
        .bind(query.job_id.map(|j| *j.as_uuid()))
        .bind(query.property_id.map(|p| *p.as_uuid()))
        .bind(query.limit.map(i64::from))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("listing refresh history", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }
}
