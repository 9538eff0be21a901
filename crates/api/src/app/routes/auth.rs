//! Public signup and login.

use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use chrono::Utc;
use tracing::info;

use imobcrm_auth::{
    MIN_PASSWORD_LEN, NewUser, Role, User, hash_password, normalize_email, verify_password,
};
use imobcrm_core::DomainError;
use imobcrm_tenancy::{Subscription, Tenant};

use crate::app::dto::{LoginRequest, SignupRequest, TokenResponse};
use crate::app::errors::{ApiError, ApiResult};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
}

pub fn check_password(password: &str) -> ApiResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(DomainError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        ))
        .into());
    }
    Ok(())
}

/// Hash off the async runtime; argon2 is deliberately slow.
pub async fn hash(password: String) -> ApiResult<String> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "password_error", e.to_string()))?
        .map_err(ApiError::from)
}

fn issue_token(services: &AppServices, user: User) -> ApiResult<TokenResponse> {
    let (access_token, claims) = services
        .jwt
        .issue(user.id, user.tenant_id, user.roles.clone(), Utc::now())?;
    Ok(TokenResponse {
        access_token,
        token_type: "Bearer",
        expires_at: claims.expires_at,
        tenant_id: user.tenant_id,
        user,
    })
}

/// POST /auth/signup
///
/// Creates the agency, its first admin and a trial subscription.
pub async fn signup(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<SignupRequest>,
) -> ApiResult<impl IntoResponse> {
    check_password(&body.password)?;
    let now = Utc::now();

    if services.stores.users.find_by_email(&normalize_email(&body.email)).await?.is_some() {
        return Err(ApiError::conflict("email is already registered"));
    }

    let tenant = Tenant::create(&body.agency_name, now)?;
    let user = User::create(
        NewUser {
            tenant_id: tenant.id,
            email: body.email,
            display_name: body.display_name,
            password_hash: hash(body.password).await?,
            roles: vec![Role::ADMIN],
        },
        now,
    )?;

    services.stores.tenants.insert(&tenant).await?;
    services.stores.users.insert(&user).await?;
    services
        .stores
        .subscriptions
        .upsert(&Subscription::start_trial(tenant.id, body.plan, now))
        .await?;

    info!(tenant_id = %tenant.id, slug = %tenant.slug, plan = %body.plan, "tenant signed up");
    Ok((StatusCode::CREATED, Json(issue_token(&services, user)?)))
}

/// POST /auth/login
pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let invalid = || ApiError::unauthorized("invalid email or password");

    let mut user = services
        .stores
        .users
        .find_by_email(&normalize_email(&body.email))
        .await?
        .ok_or_else(invalid)?;

    let hash = user.password_hash.clone();
    let password = body.password;
    let matches = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "password_error", e.to_string()))??;
    if !matches {
        return Err(invalid());
    }

    user.ensure_can_login()
        .map_err(|_| ApiError::unauthorized("user is suspended"))?;
    let tenant = services
        .stores
        .tenants
        .get(user.tenant_id)
        .await?
        .ok_or_else(invalid)?;
    if !tenant.is_active() {
        return Err(ApiError::new(StatusCode::FORBIDDEN, "tenant_suspended", "agency is suspended"));
    }

    user.record_login(Utc::now());
    services.stores.users.update(&user).await?;

    Ok(Json(issue_token(&services, user)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_passwords_are_rejected() {
        assert_eq!(check_password("short").unwrap_err().code, "validation_error");
        assert!(check_password("long enough").is_ok());
    }
}
