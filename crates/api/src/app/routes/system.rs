use axum::{extract::Extension, http::StatusCode, Json};

use crate::context::{PrincipalContext, TenantContext};

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "tenant_id": tenant.tenant_id(),
        "user_id": principal.user_id(),
        "email": principal.email(),
        "roles": principal.roles(),
        "permissions": principal.permissions(),
    }))
}
