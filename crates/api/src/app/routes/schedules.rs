use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use imobcrm_auth::perms;
use imobcrm_core::{DomainError, ScheduleId, TenantId};
use imobcrm_infra::HistoryQuery;
use imobcrm_scheduling::{RefreshSchedule, ScheduleDraft, SchedulePatch, ScheduleTarget};
use imobcrm_tenancy::Resource;

use crate::app::dto::{self, LimitQuery};
use crate::app::errors::{ApiError, ApiResult};
use crate::app::services::AppServices;
use crate::authz::require;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_schedule).get(list_schedules))
        .route(
            "/:id",
            get(get_schedule).patch(update_schedule).delete(delete_schedule),
        )
        .route("/:id/activate", post(activate_schedule))
        .route("/:id/deactivate", post(deactivate_schedule))
        .route("/:id/run", post(run_schedule))
        .route("/:id/history", get(schedule_history))
}

async fn load(services: &AppServices, tenant: &TenantContext, id: &str) -> ApiResult<RefreshSchedule> {
    let id: ScheduleId = dto::parse_id(id)?;
    services
        .stores
        .schedules
        .get(tenant.tenant_id(), id)
        .await?
        .ok_or_else(|| ApiError::not_found("schedule"))
}

/// Write configuration changes and answer with the stored row, whose run
/// state the write leaves untouched.
async fn save(services: &AppServices, schedule: &RefreshSchedule) -> ApiResult<RefreshSchedule> {
    services.stores.schedules.update(schedule).await?;
    services
        .stores
        .schedules
        .get(schedule.tenant_id, schedule.id)
        .await?
        .ok_or_else(|| ApiError::not_found("schedule"))
}

/// Every explicitly targeted property must belong to the tenant.
async fn check_target(services: &AppServices, tenant_id: TenantId, target: &ScheduleTarget) -> ApiResult<()> {
    let ScheduleTarget::Properties { property_ids } = target else {
        return Ok(());
    };
    let found = services.stores.properties.list_by_ids(tenant_id, property_ids).await?;
    if let Some(missing) = property_ids.iter().find(|id| !found.iter().any(|p| p.id == **id)) {
        return Err(DomainError::validation(format!("unknown property {missing}")).into());
    }
    Ok(())
}

pub async fn create_schedule(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<ScheduleDraft>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::SCHEDULES_WRITE)?;
    services.ensure_capacity(tenant.tenant_id(), Resource::Schedules).await?;
    check_target(&services, tenant.tenant_id(), &body.target).await?;

    let schedule = RefreshSchedule::new(tenant.tenant_id(), body, Utc::now())?;
    services.stores.schedules.insert(&schedule).await?;

    Ok((StatusCode::CREATED, Json(schedule)))
}

pub async fn list_schedules(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::SCHEDULES_READ)?;
    let items = services.stores.schedules.list(tenant.tenant_id()).await?;
    Ok(Json(dto::items(items)))
}

pub async fn get_schedule(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::SCHEDULES_READ)?;
    Ok(Json(load(&services, &tenant, &id).await?))
}

pub async fn update_schedule(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(patch): Json<SchedulePatch>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::SCHEDULES_WRITE)?;
    let mut schedule = load(&services, &tenant, &id).await?;
    if let Some(target) = &patch.target {
        check_target(&services, tenant.tenant_id(), target).await?;
    }
    schedule.update(patch, Utc::now())?;
    Ok(Json(save(&services, &schedule).await?))
}

pub async fn delete_schedule(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::SCHEDULES_WRITE)?;
    let schedule = load(&services, &tenant, &id).await?;
    if schedule.is_running {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "already_running",
            "schedule is running; deactivate it and retry later",
        ));
    }
    services.stores.schedules.delete(tenant.tenant_id(), schedule.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn activate_schedule(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::SCHEDULES_WRITE)?;
    let mut schedule = load(&services, &tenant, &id).await?;
    schedule.activate(Utc::now());
    Ok(Json(save(&services, &schedule).await?))
}

pub async fn deactivate_schedule(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::SCHEDULES_WRITE)?;
    let mut schedule = load(&services, &tenant, &id).await?;
    schedule.deactivate(Utc::now());
    Ok(Json(save(&services, &schedule).await?))
}

/// Run outside the schedule's cadence. Answers with the pending job.
pub async fn run_schedule(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::SCHEDULES_WRITE)?;
    let id: ScheduleId = dto::parse_id(&id)?;
    let job = services.scheduler.run_now(tenant.tenant_id(), id).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// Per-property results of the schedule's runs, newest first.
pub async fn schedule_history(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Query(params): Query<LimitQuery>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::SCHEDULES_READ)?;
    let schedule = load(&services, &tenant, &id).await?;
    let query = HistoryQuery {
        schedule_id: Some(schedule.id),
        limit: Some(dto::page_limit(params.limit)),
        ..Default::default()
    };
    let rows = services.stores.refresh_log.list_history(tenant.tenant_id(), &query).await?;
    Ok(Json(dto::items(rows)))
}
