use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are modeled as opaque strings (e.g. "properties.read").
/// A special wildcard permission `"*"` can be used by policy layers to indicate
/// "allow all" without hardcoding domain permissions into tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Permissions checked by the HTTP layer.
pub mod perms {
    use super::Permission;

    pub const WILDCARD: Permission = Permission::from_static("*");

    pub const PROPERTIES_READ: Permission = Permission::from_static("properties.read");
    pub const PROPERTIES_WRITE: Permission = Permission::from_static("properties.write");
    /// Publish/unpublish/refresh listings on the marketplace.
    pub const PROPERTIES_SYNC: Permission = Permission::from_static("properties.sync");

    pub const INTEGRATIONS_MANAGE: Permission = Permission::from_static("integrations.manage");

    pub const SCHEDULES_READ: Permission = Permission::from_static("schedules.read");
    pub const SCHEDULES_WRITE: Permission = Permission::from_static("schedules.write");

    pub const USERS_READ: Permission = Permission::from_static("admin.users.read");
    pub const USERS_WRITE: Permission = Permission::from_static("admin.users.write");

    pub const BILLING_MANAGE: Permission = Permission::from_static("billing.manage");
    pub const PARTNERSHIPS_MANAGE: Permission = Permission::from_static("partnerships.manage");
}
