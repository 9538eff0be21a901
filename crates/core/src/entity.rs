//! Entity traits: identity and tenant ownership.

use crate::id::TenantId;

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}

/// An entity that belongs to exactly one tenant.
///
/// Repositories use this to refuse writes whose owner differs from the
/// caller's tenant context.
pub trait TenantOwned: Entity {
    fn tenant_id(&self) -> TenantId;

    fn is_owned_by(&self, tenant_id: TenantId) -> bool {
        self.tenant_id() == tenant_id
    }
}
