//! Marketplace account connection.

use std::sync::Arc;

use axum::{
    extract::Extension,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use imobcrm_auth::perms;

use crate::app::dto::ConnectRequest;
use crate::app::errors::ApiResult;
use crate::app::services::AppServices;
use crate::authz::require;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/canalpro/connect", post(connect))
        .route("/canalpro/status", get(status))
        .route("/canalpro/disconnect", post(disconnect))
        .route("/canalpro/renew", post(renew))
}

async fn status_body(services: &AppServices, tenant: &TenantContext) -> ApiResult<serde_json::Value> {
    let status = services.tokens.status(tenant.tenant_id()).await?;
    Ok(json!({
        "connected": status.is_some(),
        "connection": status,
    }))
}

/// POST /integrations/canalpro/connect
///
/// The password is only stored (encrypted) when `remember` is set.
pub async fn connect(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<ConnectRequest>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::INTEGRATIONS_MANAGE)?;
    services
        .tokens
        .connect(tenant.tenant_id(), body.email.trim(), &body.password, body.remember)
        .await?;
    Ok(Json(status_body(&services, &tenant).await?))
}

/// GET /integrations/canalpro/status
pub async fn status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::PROPERTIES_READ)?;
    Ok(Json(status_body(&services, &tenant).await?))
}

/// POST /integrations/canalpro/disconnect
pub async fn disconnect(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::INTEGRATIONS_MANAGE)?;
    let removed = services.tokens.disconnect(tenant.tenant_id()).await?;
    Ok(Json(json!({ "disconnected": removed })))
}

/// POST /integrations/canalpro/renew
pub async fn renew(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::INTEGRATIONS_MANAGE)?;
    services.tokens.renew(tenant.tenant_id()).await?;
    Ok(Json(status_body(&services, &tenant).await?))
}
