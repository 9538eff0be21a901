use std::collections::HashSet;

use thiserror::Error;

use imobcrm_core::{TenantId, UserId};

use crate::{Permission, TenantMembership};

/// A fully resolved principal for authorization decisions.
///
/// Construction is decoupled from storage and transport: the API derives the
/// membership from verified JWT claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub active_tenant_id: TenantId,
    pub membership: TenantMembership,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("tenant mismatch")]
    TenantMismatch,

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Authorize a principal within its active tenant context.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    if principal.active_tenant_id != principal.membership.tenant_id {
        return Err(AuthzError::TenantMismatch);
    }

    let perms: HashSet<&str> = principal
        .membership
        .permissions
        .iter()
        .map(|p| p.as_str())
        .collect();

    if perms.contains("*") || perms.contains(required.as_str()) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Role, perms};

    fn principal(roles: Vec<Role>) -> Principal {
        let tenant = TenantId::new();
        Principal {
            user_id: UserId::new(),
            active_tenant_id: tenant,
            membership: TenantMembership::from_roles(tenant, roles),
        }
    }

    #[test]
    fn admin_passes_everything() {
        let p = principal(vec![Role::ADMIN]);
        assert!(authorize(&p, &perms::BILLING_MANAGE).is_ok());
        assert!(authorize(&p, &perms::PROPERTIES_SYNC).is_ok());
    }

    #[test]
    fn viewer_cannot_write() {
        let p = principal(vec![Role::VIEWER]);
        assert!(authorize(&p, &perms::PROPERTIES_READ).is_ok());
        assert_eq!(
            authorize(&p, &perms::PROPERTIES_WRITE),
            Err(AuthzError::Forbidden("properties.write".into()))
        );
    }

    #[test]
    fn tenant_mismatch_is_rejected_before_permissions() {
        let mut p = principal(vec![Role::ADMIN]);
        p.active_tenant_id = TenantId::new();
        assert_eq!(
            authorize(&p, &perms::PROPERTIES_READ),
            Err(AuthzError::TenantMismatch)
        );
    }
}
