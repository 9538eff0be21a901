use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;

use imobcrm_auth::perms;
use imobcrm_core::RefreshJobId;
use imobcrm_infra::HistoryQuery;

use crate::app::dto::{self, JobsQuery};
use crate::app::errors::{ApiError, ApiResult};
use crate::app::services::AppServices;
use crate::authz::require;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_jobs))
        .route("/:id", get(get_job))
}

/// GET /refresh-jobs?schedule_id=&limit=
pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(params): Query<JobsQuery>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::SCHEDULES_READ)?;
    let jobs = services
        .stores
        .refresh_log
        .list_jobs(tenant.tenant_id(), params.schedule_id, dto::page_limit(params.limit))
        .await?;
    Ok(Json(dto::items(jobs)))
}

/// GET /refresh-jobs/:id, with the job's per-property history.
pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::SCHEDULES_READ)?;
    let id: RefreshJobId = dto::parse_id(&id)?;
    let job = services
        .stores
        .refresh_log
        .get_job(tenant.tenant_id(), id)
        .await?
        .ok_or_else(|| ApiError::not_found("refresh job"))?;
    let history = services
        .stores
        .refresh_log
        .list_history(
            tenant.tenant_id(),
            &HistoryQuery {
                job_id: Some(job.id),
                ..Default::default()
            },
        )
        .await?;

    Ok(Json(json!({
        "job": job,
        "duration_ms": job.duration_ms(),
        "history": history,
    })))
}
