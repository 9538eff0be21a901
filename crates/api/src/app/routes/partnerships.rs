//! Partnerships between agencies and the listings they share.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use imobcrm_auth::perms;
use imobcrm_core::{DomainResult, PartnershipId, PropertyId, TenantId};
use imobcrm_tenancy::{Partnership, PartnershipStatus};

use crate::app::dto::{self, ProposePartnershipRequest, SharePropertyRequest};
use crate::app::errors::{ApiError, ApiResult};
use crate::app::services::AppServices;
use crate::authz::require;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(propose).get(list_partnerships))
        .route("/shared-properties", get(shared_properties))
        .route("/:id", get(get_partnership))
        .route("/:id/accept", post(accept))
        .route("/:id/reject", post(reject))
        .route("/:id/revoke", post(revoke))
        .route("/:id/share", post(share_property))
        .route("/:id/share/:property_id", delete(unshare_property))
}

async fn load(services: &AppServices, tenant: &TenantContext, id: &str) -> ApiResult<Partnership> {
    let id: PartnershipId = dto::parse_id(id)?;
    services
        .stores
        .partnerships
        .get(tenant.tenant_id(), id)
        .await?
        .ok_or_else(|| ApiError::not_found("partnership"))
}

/// Load, apply `change` as the caller's tenant, persist.
async fn transition<F>(services: &AppServices, tenant: &TenantContext, id: &str, change: F) -> ApiResult<Partnership>
where
    F: FnOnce(&mut Partnership, TenantId) -> DomainResult<()>,
{
    let mut partnership = load(services, tenant, id).await?;
    change(&mut partnership, tenant.tenant_id())?;
    services.stores.partnerships.update(&partnership).await?;
    Ok(partnership)
}

pub async fn propose(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<ProposePartnershipRequest>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::PARTNERSHIPS_MANAGE)?;
    let partner = services
        .stores
        .tenants
        .get(body.partner_tenant_id)
        .await?
        .filter(|t| t.is_active())
        .ok_or_else(|| ApiError::not_found("partner agency"))?;

    if services
        .stores
        .partnerships
        .find_open_between(tenant.tenant_id(), partner.id)
        .await?
        .is_some()
    {
        return Err(ApiError::conflict("a partnership with this agency is already open"));
    }

    let partnership = Partnership::propose(tenant.tenant_id(), partner.id, body.message, Utc::now())?;
    services.stores.partnerships.insert(&partnership).await?;

    Ok((StatusCode::CREATED, Json(partnership)))
}

pub async fn list_partnerships(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::PROPERTIES_READ)?;
    let items = services.stores.partnerships.list_for(tenant.tenant_id()).await?;
    Ok(Json(dto::items(items)))
}

pub async fn get_partnership(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::PROPERTIES_READ)?;
    Ok(Json(load(&services, &tenant, &id).await?))
}

pub async fn accept(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::PARTNERSHIPS_MANAGE)?;
    let now = Utc::now();
    Ok(Json(transition(&services, &tenant, &id, |p, actor| p.accept(actor, now)).await?))
}

pub async fn reject(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::PARTNERSHIPS_MANAGE)?;
    let now = Utc::now();
    Ok(Json(transition(&services, &tenant, &id, |p, actor| p.reject(actor, now)).await?))
}

pub async fn revoke(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::PARTNERSHIPS_MANAGE)?;
    let now = Utc::now();
    Ok(Json(transition(&services, &tenant, &id, |p, actor| p.revoke(actor, now)).await?))
}

/// Only the caller's own listings can be shared.
pub async fn share_property(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<SharePropertyRequest>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::PARTNERSHIPS_MANAGE)?;
    services
        .stores
        .properties
        .get(tenant.tenant_id(), body.property_id)
        .await?
        .ok_or_else(|| ApiError::not_found("property"))?;

    let now = Utc::now();
    let partnership = transition(&services, &tenant, &id, |p, actor| {
        p.share_property(actor, body.property_id, now)
    })
    .await?;
    Ok(Json(partnership))
}

pub async fn unshare_property(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path((id, property_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::PARTNERSHIPS_MANAGE)?;
    let property_id: PropertyId = dto::parse_id(&property_id)?;
    let now = Utc::now();
    let partnership = transition(&services, &tenant, &id, |p, actor| {
        p.unshare_property(actor, property_id, now)
    })
    .await?;
    Ok(Json(partnership))
}

/// Listings other agencies share with the caller through accepted partnerships.
pub async fn shared_properties(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::PROPERTIES_READ)?;
    let viewer = tenant.tenant_id();
    let partnerships = services.stores.partnerships.list_for(viewer).await?;

    let mut items = Vec::new();
    for partnership in partnerships.iter().filter(|p| p.status == PartnershipStatus::Accepted) {
        for shared in partnership.shared_with(viewer) {
            let property = services
                .stores
                .properties
                .get(shared.owner_tenant_id, shared.property_id)
                .await?;
            // Deleted by its owner after sharing.
            let Some(property) = property else { continue };
            items.push(json!({
                "partnership_id": partnership.id,
                "owner_tenant_id": shared.owner_tenant_id,
                "shared_at": shared.shared_at,
                "property": property,
            }));
        }
    }

    Ok(Json(dto::items(items)))
}
