//! Tenant-scoped user administration.
//!
//! Non-admins may only hand out roles they hold themselves.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;

use imobcrm_auth::{NewUser, Role, User, perms};
use imobcrm_core::UserId;
use imobcrm_tenancy::Resource;

use crate::app::dto::{self, CreateUserRequest, RoleRequest, UpdateUserRequest};
use crate::app::errors::{ApiError, ApiResult};
use crate::app::routes::auth::{check_password, hash};
use crate::app::services::AppServices;
use crate::authz::require;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/users", post(create_user).get(list_users))
        .route("/users/:id", get(get_user).patch(update_user).delete(delete_user))
        .route("/users/:id/roles", post(assign_role))
        .route("/users/:id/roles/:role", delete(revoke_role))
        .route("/users/:id/suspend", post(suspend_user))
        .route("/users/:id/activate", post(activate_user))
}

fn ensure_grantable(principal: &PrincipalContext, role: &Role) -> ApiResult<()> {
    let actor_is_admin = principal.roles().contains(&Role::ADMIN);
    if !actor_is_admin && !principal.roles().contains(role) {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "privilege_escalation",
            format!("cannot assign role '{role}' that you don't have"),
        ));
    }
    Ok(())
}

async fn load_user(services: &AppServices, tenant: &TenantContext, id: &str) -> ApiResult<User> {
    let user_id: UserId = dto::parse_id(id)?;
    services
        .stores
        .users
        .get(tenant.tenant_id(), user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("user"))
}

/// POST /admin/users
pub async fn create_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<CreateUserRequest>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::USERS_WRITE)?;
    for role in &body.roles {
        ensure_grantable(&principal, role)?;
    }
    check_password(&body.password)?;
    services.ensure_capacity(tenant.tenant_id(), Resource::Users).await?;

    let user = User::create(
        NewUser {
            tenant_id: tenant.tenant_id(),
            email: body.email,
            display_name: body.display_name,
            password_hash: hash(body.password).await?,
            roles: body.roles,
        },
        Utc::now(),
    )?;
    services.stores.users.insert(&user).await?;

    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /admin/users
pub async fn list_users(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::USERS_READ)?;
    let users = services.stores.users.list(tenant.tenant_id()).await?;
    Ok(Json(dto::items(users)))
}

/// GET /admin/users/:id
pub async fn get_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::USERS_READ)?;
    Ok(Json(load_user(&services, &tenant, &id).await?))
}

/// PATCH /admin/users/:id
pub async fn update_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<UpdateUserRequest>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::USERS_WRITE)?;
    let mut user = load_user(&services, &tenant, &id).await?;
    let now = Utc::now();

    if let Some(name) = body.display_name.as_deref() {
        user.rename(name, now)?;
    }
    if let Some(password) = body.password {
        check_password(&password)?;
        user.set_password_hash(hash(password).await?, now);
    }
    services.stores.users.update(&user).await?;

    Ok(Json(user))
}

/// DELETE /admin/users/:id
pub async fn delete_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::USERS_WRITE)?;
    let user = load_user(&services, &tenant, &id).await?;
    if user.id == principal.user_id() {
        return Err(ApiError::conflict("you cannot delete your own account"));
    }
    services.stores.users.delete(tenant.tenant_id(), user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /admin/users/:id/roles
pub async fn assign_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<RoleRequest>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::USERS_WRITE)?;
    ensure_grantable(&principal, &body.role)?;

    let mut user = load_user(&services, &tenant, &id).await?;
    user.assign_role(body.role, Utc::now())?;
    services.stores.users.update(&user).await?;

    Ok(Json(user))
}

/// DELETE /admin/users/:id/roles/:role
pub async fn revoke_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path((id, role)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::USERS_WRITE)?;
    let role = Role::new(role);
    ensure_grantable(&principal, &role)?;

    let mut user = load_user(&services, &tenant, &id).await?;
    user.revoke_role(&role, Utc::now())?;
    services.stores.users.update(&user).await?;

    Ok(Json(user))
}

/// POST /admin/users/:id/suspend
pub async fn suspend_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::USERS_WRITE)?;
    let mut user = load_user(&services, &tenant, &id).await?;
    if user.id == principal.user_id() {
        return Err(ApiError::conflict("you cannot suspend your own account"));
    }
    user.suspend(Utc::now())?;
    services.stores.users.update(&user).await?;

    Ok(Json(user))
}

/// POST /admin/users/:id/activate
pub async fn activate_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::USERS_WRITE)?;
    let mut user = load_user(&services, &tenant, &id).await?;
    user.activate(Utc::now())?;
    services.stores.users.update(&user).await?;

    Ok(Json(user))
}
