use imobcrm_auth::{Permission, Role, permissions_for_roles};
use imobcrm_core::{TenantId, UserId};

/// Tenant context for a request.
///
/// Derived from the verified token; every domain route requires it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: TenantId,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// Authenticated user for a request, with the roles currently stored for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    user_id: UserId,
    email: String,
    roles: Vec<Role>,
}

impl PrincipalContext {
    pub fn new(user_id: UserId, email: String, roles: Vec<Role>) -> Self {
        Self { user_id, email, roles }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn permissions(&self) -> Vec<Permission> {
        permissions_for_roles(&self.roles)
    }
}
