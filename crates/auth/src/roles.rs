use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::permissions::{Permission, perms};

/// Role identifier used for RBAC.
///
/// Roles are opaque strings at this layer; `role_permissions` is the single
/// policy source that maps them to permissions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub const ADMIN: Role = Role(Cow::Borrowed("admin"));
    pub const MANAGER: Role = Role(Cow::Borrowed("manager"));
    pub const AGENT: Role = Role(Cow::Borrowed("agent"));
    pub const VIEWER: Role = Role(Cow::Borrowed("viewer"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this role is one of the roles known to the policy.
    pub fn is_known(&self) -> bool {
        matches!(self.as_str(), "admin" | "manager" | "agent" | "viewer")
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role → permission mapping.
///
/// Unknown roles grant nothing.
pub fn role_permissions(role: &Role) -> Vec<Permission> {
    match role.as_str() {
        "admin" => vec![perms::WILDCARD],
        "manager" => vec![
            perms::PROPERTIES_READ,
            perms::PROPERTIES_WRITE,
            perms::PROPERTIES_SYNC,
            perms::INTEGRATIONS_MANAGE,
            perms::SCHEDULES_READ,
            perms::SCHEDULES_WRITE,
            perms::USERS_READ,
            perms::PARTNERSHIPS_MANAGE,
        ],
        "agent" => vec![
            perms::PROPERTIES_READ,
            perms::PROPERTIES_WRITE,
            perms::PROPERTIES_SYNC,
            perms::SCHEDULES_READ,
        ],
        "viewer" => vec![perms::PROPERTIES_READ, perms::SCHEDULES_READ],
        _ => Vec::new(),
    }
}

/// Union of the permissions granted by `roles`.
pub fn permissions_for_roles(roles: &[Role]) -> Vec<Permission> {
    let mut out: Vec<Permission> = Vec::new();
    for role in roles {
        for perm in role_permissions(role) {
            if !out.contains(&perm) {
                out.push(perm);
            }
        }
    }
    out
}
