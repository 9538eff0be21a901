//! Permission checks at the handler boundary.

use imobcrm_auth::{Permission, Principal, TenantMembership, authorize};

use crate::app::errors::ApiError;
use crate::context::{PrincipalContext, TenantContext};

/// Fail with 403 unless the principal holds `required` in the request's tenant.
pub fn require(tenant: &TenantContext, principal: &PrincipalContext, required: &Permission) -> Result<(), ApiError> {
    let principal = Principal {
        user_id: principal.user_id(),
        active_tenant_id: tenant.tenant_id(),
        membership: TenantMembership::from_roles(tenant.tenant_id(), principal.roles().to_vec()),
    };
    authorize(&principal, required)?;
    Ok(())
}
