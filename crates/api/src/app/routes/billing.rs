//! Subscription management. No payment gateway: `activate` stands in for a
//! confirmed payment.

use std::sync::Arc;

use axum::{
    extract::Extension,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use tracing::info;

use imobcrm_auth::perms;
use imobcrm_core::{DomainError, TenantId};
use imobcrm_tenancy::{Plan, Resource, Subscription};

use crate::app::dto::ChangePlanRequest;
use crate::app::errors::ApiResult;
use crate::app::services::AppServices;
use crate::authz::require;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/subscription", get(get_subscription))
        .route("/plan", post(change_plan))
        .route("/cancel", post(cancel))
        .route("/activate", post(activate))
}

async fn usage(services: &AppServices, tenant_id: TenantId) -> ApiResult<[(Resource, u64); 3]> {
    Ok([
        (Resource::Properties, services.stores.properties.count(tenant_id).await?),
        (Resource::Users, services.stores.users.count(tenant_id).await?),
        (Resource::Schedules, services.stores.schedules.count(tenant_id).await?),
    ])
}

async fn subscription_body(services: &AppServices, subscription: Subscription) -> ApiResult<serde_json::Value> {
    let usage = usage(services, subscription.tenant_id).await?;
    let usage: serde_json::Map<String, serde_json::Value> = usage
        .iter()
        .map(|(resource, count)| (resource.as_str().to_string(), json!(count)))
        .collect();
    Ok(json!({
        "subscription": subscription,
        "limits": subscription.plan.limits(),
        "monthly_price_cents": subscription.plan.monthly_price_cents(),
        "entitled": subscription.is_entitled(Utc::now()),
        "usage": usage,
    }))
}

/// A downgrade must leave current usage within the new plan.
fn ensure_fits(plan: Plan, usage: &[(Resource, u64)]) -> ApiResult<()> {
    let limits = plan.limits();
    for (resource, count) in usage {
        if let Some(max) = limits.max_for(*resource) {
            if *count > u64::from(max) {
                return Err(DomainError::limit_exceeded(format!(
                    "plan {plan} allows at most {max} {resource}; {count} in use"
                ))
                .into());
            }
        }
    }
    Ok(())
}

pub async fn get_subscription(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::BILLING_MANAGE)?;
    let subscription = services.subscription(tenant.tenant_id()).await?;
    Ok(Json(subscription_body(&services, subscription).await?))
}

pub async fn change_plan(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<ChangePlanRequest>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::BILLING_MANAGE)?;
    let mut subscription = services.subscription(tenant.tenant_id()).await?;
    ensure_fits(body.plan, &usage(&services, tenant.tenant_id()).await?)?;

    let previous = subscription.plan;
    subscription.change_plan(body.plan, Utc::now())?;
    services.stores.subscriptions.upsert(&subscription).await?;
    info!(tenant_id = %tenant.tenant_id(), from = %previous, to = %body.plan, "plan changed");

    Ok(Json(subscription_body(&services, subscription).await?))
}

pub async fn cancel(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::BILLING_MANAGE)?;
    let mut subscription = services.subscription(tenant.tenant_id()).await?;
    subscription.cancel(Utc::now())?;
    services.stores.subscriptions.upsert(&subscription).await?;
    info!(tenant_id = %tenant.tenant_id(), "subscription canceled");

    Ok(Json(subscription_body(&services, subscription).await?))
}

pub async fn activate(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult<impl IntoResponse> {
    require(&tenant, &principal, &perms::BILLING_MANAGE)?;
    let mut subscription = services.subscription(tenant.tenant_id()).await?;
    subscription.activate(Utc::now())?;
    services.stores.subscriptions.upsert(&subscription).await?;

    Ok(Json(subscription_body(&services, subscription).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downgrade_must_fit_usage() {
        let usage = [
            (Resource::Properties, 12),
            (Resource::Users, 1),
            (Resource::Schedules, 0),
        ];
        assert!(ensure_fits(Plan::Basic, &usage).is_ok());
        let err = ensure_fits(Plan::Free, &usage).unwrap_err();
        assert_eq!(err.code, "plan_limit_exceeded");
    }
}
