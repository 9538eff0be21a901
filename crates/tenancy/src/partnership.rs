//! Partnerships: two tenants sharing selected listings with each other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use imobcrm_core::{DomainError, DomainResult, Entity, PartnershipId, PropertyId, TenantId, text_enum};

text_enum! {
    pub enum PartnershipStatus {
        Pending => "pending",
        Accepted => "accepted",
        Rejected => "rejected",
        Revoked => "revoked",
    }
}

/// A listing one side has shared with the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedProperty {
    pub owner_tenant_id: TenantId,
    pub property_id: PropertyId,
    pub shared_at: DateTime<Utc>,
}

/// # Invariants
/// - `requester_tenant_id != partner_tenant_id`.
/// - Only the partner side answers a proposal.
/// - Properties are shared only while accepted, and only by their owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partnership {
    pub id: PartnershipId,
    pub requester_tenant_id: TenantId,
    pub partner_tenant_id: TenantId,
    pub status: PartnershipStatus,
    pub message: Option<String>,
    pub shared: Vec<SharedProperty>,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Partnership {
    pub fn propose(
        requester: TenantId,
        partner: TenantId,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if requester == partner {
            return Err(DomainError::validation("a tenant cannot partner with itself"));
        }
        Ok(Self {
            id: PartnershipId::new(),
            requester_tenant_id: requester,
            partner_tenant_id: partner,
            status: PartnershipStatus::Pending,
            message: message.map(|m| m.trim().to_string()).filter(|m| !m.is_empty()),
            shared: Vec::new(),
            created_at: now,
            responded_at: None,
            updated_at: now,
        })
    }

    pub fn involves(&self, tenant: TenantId) -> bool {
        self.requester_tenant_id == tenant || self.partner_tenant_id == tenant
    }

    /// The other side of the partnership, if `tenant` is one of them.
    pub fn counterpart(&self, tenant: TenantId) -> Option<TenantId> {
        if tenant == self.requester_tenant_id {
            Some(self.partner_tenant_id)
        } else if tenant == self.partner_tenant_id {
            Some(self.requester_tenant_id)
        } else {
            None
        }
    }

    fn ensure_member(&self, actor: TenantId) -> DomainResult<()> {
        if !self.involves(actor) {
            return Err(DomainError::NotFound);
        }
        Ok(())
    }

    fn respond(&mut self, actor: TenantId, status: PartnershipStatus, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_member(actor)?;
        if actor != self.partner_tenant_id {
            return Err(DomainError::Unauthorized);
        }
        if self.status != PartnershipStatus::Pending {
            return Err(DomainError::invariant(format!("partnership is already {}", self.status)));
        }
        self.status = status;
        self.responded_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn accept(&mut self, actor: TenantId, now: DateTime<Utc>) -> DomainResult<()> {
        self.respond(actor, PartnershipStatus::Accepted, now)
    }

    pub fn reject(&mut self, actor: TenantId, now: DateTime<Utc>) -> DomainResult<()> {
        self.respond(actor, PartnershipStatus::Rejected, now)
    }

    /// End the partnership from either side. Shared listings are withdrawn.
    pub fn revoke(&mut self, actor: TenantId, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_member(actor)?;
        match self.status {
            PartnershipStatus::Pending | PartnershipStatus::Accepted => {}
            other => return Err(DomainError::invariant(format!("partnership is already {other}"))),
        }
        self.status = PartnershipStatus::Revoked;
        self.shared.clear();
        self.updated_at = now;
        Ok(())
    }

    /// Share one of `actor`'s own listings. Ownership is checked by the caller.
    pub fn share_property(
        &mut self,
        actor: TenantId,
        property_id: PropertyId,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_member(actor)?;
        if self.status != PartnershipStatus::Accepted {
            return Err(DomainError::invariant("partnership is not accepted"));
        }
        if self.shared.iter().any(|s| s.property_id == property_id) {
            return Err(DomainError::conflict("property is already shared"));
        }
        self.shared.push(SharedProperty {
            owner_tenant_id: actor,
            property_id,
            shared_at: now,
        });
        self.updated_at = now;
        Ok(())
    }

    pub fn unshare_property(
        &mut self,
        actor: TenantId,
        property_id: PropertyId,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_member(actor)?;
        let idx = self
            .shared
            .iter()
            .position(|s| s.property_id == property_id && s.owner_tenant_id == actor)
            .ok_or(DomainError::NotFound)?;
        self.shared.remove(idx);
        self.updated_at = now;
        Ok(())
    }

    /// Whether `viewer` may read `property_id` through this partnership.
    pub fn can_view(&self, viewer: TenantId, property_id: PropertyId) -> bool {
        self.status == PartnershipStatus::Accepted
            && self.involves(viewer)
            && self
                .shared
                .iter()
                .any(|s| s.property_id == property_id && s.owner_tenant_id != viewer)
    }

    /// Listings shared *with* `viewer` by the other side.
    pub fn shared_with(&self, viewer: TenantId) -> impl Iterator<Item = &SharedProperty> + '_ {
        let visible = self.status == PartnershipStatus::Accepted && self.involves(viewer);
        self.shared
            .iter()
            .filter(move |s| visible && s.owner_tenant_id != viewer)
    }
}

impl Entity for Partnership {
    type Id = PartnershipId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
