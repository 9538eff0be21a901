use std::sync::Arc;

use axum::{
    extract::State,
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tracing::debug;

use imobcrm_auth::JwtValidator;
use imobcrm_infra::Stores;

use crate::app::errors::ApiError;
use crate::context::{PrincipalContext, TenantContext};

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<dyn JwtValidator>,
    pub stores: Stores,
}

/// Resolve the bearer token into tenant and principal contexts.
///
/// Roles come from the stored user rather than the token, so role changes and
/// suspensions apply to tokens already issued.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    match authenticate(&state, req.headers()).await {
        Ok((tenant, principal)) => {
            req.extensions_mut().insert(tenant);
            req.extensions_mut().insert(principal);
            next.run(req).await
        }
        Err(err) => err.into_response(),
    }
}

async fn authenticate(state: &AuthState, headers: &HeaderMap) -> Result<(TenantContext, PrincipalContext), ApiError> {
    let token = extract_bearer(headers)?;

    let claims = state.jwt.validate(token, Utc::now()).map_err(|e| {
        debug!(error = %e, "rejected bearer token");
        ApiError::unauthorized("invalid or expired token")
    })?;

    let user = state
        .stores
        .users
        .get(claims.tenant_id, claims.sub)
        .await?
        .ok_or_else(|| ApiError::unauthorized("user no longer exists"))?;
    if !user.is_active() {
        return Err(ApiError::unauthorized("user is suspended"));
    }

    Ok((
        TenantContext::new(claims.tenant_id),
        PrincipalContext::new(user.id, user.email, user.roles),
    ))
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, ApiError> {
    let missing = || ApiError::unauthorized("missing bearer token");

    let header = headers.get(axum::http::header::AUTHORIZATION).ok_or_else(missing)?;
    let header = header.to_str().map_err(|_| missing())?;
    let token = header.strip_prefix("Bearer ").ok_or_else(missing)?.trim();
    if token.is_empty() {
        return Err(missing());
    }

    Ok(token)
}
