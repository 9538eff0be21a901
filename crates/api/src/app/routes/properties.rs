use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tracing::info;

use imobcrm_auth::perms;
use imobcrm_core::PropertyId;
use imobcrm_infra::PropertyFilter;
use imobcrm_listings::{Property, PropertyDraft, PropertyPatch};
use imobcrm_tenancy::Resource;

use crate::app::dto;
use crate::app::errors::{ApiError, ApiResult};
use crate::app::services::AppServices;
use crate::authz::require;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_property).get(list_properties))
        .route("/import", post(import_properties))
        .route(
            "/:id",
            get(get_property).patch(update_property).delete(delete_property),
        )
        .route("/:id/publish", post(publish_property))
        .route("/:id/unpublish", post(unpublish_property))
        .route("/:id/refresh", post(refresh_property))
}

async fn load(services: &AppServices, tenant: &TenantContext, id: &str) -> ApiResult<Property> {
    let id: PropertyId = dto::parse_id(id)?;
    services
        .stores
        .properties
        .get(tenant.tenant_id(), id)
        .await?
        .ok_or_else(|| ApiError::not_found("property"))
}

pub async fn create_property(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<PropertyDraft>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::PROPERTIES_WRITE)?;
    services.ensure_capacity(tenant.tenant_id(), Resource::Properties).await?;

    let property = Property::create(tenant.tenant_id(), body, Utc::now())?;
    services.stores.properties.insert(&property).await?;

    Ok((StatusCode::CREATED, Json(property)))
}

pub async fn list_properties(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(mut filter): Query<PropertyFilter>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::PROPERTIES_READ)?;
    filter.limit = Some(dto::page_limit(filter.limit));

    let items = services.stores.properties.list(tenant.tenant_id(), &filter).await?;
    Ok(Json(dto::items(items)))
}

pub async fn get_property(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::PROPERTIES_READ)?;
    Ok(Json(load(&services, &tenant, &id).await?))
}

/// Content changes to a published listing leave it `outdated` until the
/// next publish or refresh.
pub async fn update_property(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(patch): Json<PropertyPatch>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::PROPERTIES_WRITE)?;
    let mut property = load(&services, &tenant, &id).await?;
    if !patch.is_empty() {
        patch.apply(&mut property, Utc::now())?;
        services.stores.properties.update(&property).await?;
    }
    Ok(Json(property))
}

/// A published listing is taken off the marketplace before it is deleted.
pub async fn delete_property(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::PROPERTIES_WRITE)?;
    let property = load(&services, &tenant, &id).await?;
    if property.is_published() {
        services.sync.unpublish(tenant.tenant_id(), property.id).await?;
    }
    services.stores.properties.delete(tenant.tenant_id(), property.id).await?;
    info!(tenant_id = %tenant.tenant_id(), property_id = %property.id, "property deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn publish_property(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::PROPERTIES_SYNC)?;
    let id: PropertyId = dto::parse_id(&id)?;
    Ok(Json(services.sync.publish(tenant.tenant_id(), id).await?))
}

pub async fn unpublish_property(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::PROPERTIES_SYNC)?;
    let id: PropertyId = dto::parse_id(&id)?;
    Ok(Json(services.sync.unpublish(tenant.tenant_id(), id).await?))
}

/// Queue a one-off refresh. Answers with the pending job.
pub async fn refresh_property(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::PROPERTIES_SYNC)?;
    let id: PropertyId = dto::parse_id(&id)?;
    let job = services.scheduler.refresh_property_now(tenant.tenant_id(), id).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// Pull the connected account's marketplace listings into the catalogue.
pub async fn import_properties(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::PROPERTIES_SYNC)?;
    Ok(Json(services.sync.import_remote(tenant.tenant_id()).await?))
}
