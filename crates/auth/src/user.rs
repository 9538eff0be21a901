//! User entity for identity management.
//!
//! Users belong to exactly one tenant. Email is unique across the whole
//! system (enforced by the user store).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use imobcrm_core::{DomainError, DomainResult, Entity, TenantId, TenantOwned, UserId};

use crate::Role;

// ─────────────────────────────────────────────────────────────────────────────
// User Status
// ─────────────────────────────────────────────────────────────────────────────

/// User account status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    /// User is active and can authenticate.
    #[default]
    Active,
    /// User is suspended and cannot authenticate.
    Suspended,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Suspended => "suspended",
        }
    }
}

impl core::str::FromStr for UserStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(UserStatus::Active),
            "suspended" => Ok(UserStatus::Suspended),
            other => Err(DomainError::validation(format!("unknown user status '{other}'"))),
        }
    }
}

impl core::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// User
// ─────────────────────────────────────────────────────────────────────────────

/// A tenant user.
///
/// # Invariants
/// - `tenant_id` is immutable after creation.
/// - Suspended users cannot log in nor be assigned new roles.
/// - A user always keeps at least one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub tenant_id: TenantId,
    pub email: String,
    pub display_name: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub roles: Vec<Role>,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// Input for creating a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub tenant_id: TenantId,
    pub email: String,
    pub display_name: String,
    pub password_hash: String,
    pub roles: Vec<Role>,
}

/// Normalize an email address for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl User {
    pub fn create(input: NewUser, now: DateTime<Utc>) -> DomainResult<Self> {
        let email = normalize_email(&input.email);
        if email.is_empty() || !email.contains('@') {
            return Err(DomainError::validation("invalid email format"));
        }
        let display_name = input.display_name.trim().to_string();
        if display_name.is_empty() {
            return Err(DomainError::validation("display name cannot be empty"));
        }
        if input.roles.is_empty() {
            return Err(DomainError::validation("user needs at least one role"));
        }
        if let Some(role) = input.roles.iter().find(|r| !r.is_known()) {
            return Err(DomainError::validation(format!("unknown role '{role}'")));
        }

        let mut roles: Vec<Role> = Vec::with_capacity(input.roles.len());
        for role in input.roles {
            if !roles.contains(&role) {
                roles.push(role);
            }
        }

        Ok(Self {
            id: UserId::new(),
            tenant_id: input.tenant_id,
            email,
            display_name,
            password_hash: input.password_hash,
            roles,
            status: UserStatus::Active,
            created_at: now,
            updated_at: now,
            last_login_at: None,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    /// Check that the user may authenticate.
    pub fn ensure_can_login(&self) -> DomainResult<()> {
        if !self.is_active() {
            return Err(DomainError::Unauthorized);
        }
        Ok(())
    }

    pub fn record_login(&mut self, now: DateTime<Utc>) {
        self.last_login_at = Some(now);
    }

    pub fn rename(&mut self, display_name: &str, now: DateTime<Utc>) -> DomainResult<()> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(DomainError::validation("display name cannot be empty"));
        }
        self.display_name = display_name.to_string();
        self.updated_at = now;
        Ok(())
    }

    pub fn set_password_hash(&mut self, password_hash: String, now: DateTime<Utc>) {
        self.password_hash = password_hash;
        self.updated_at = now;
    }

    pub fn suspend(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status == UserStatus::Suspended {
            return Err(DomainError::invariant("user is already suspended"));
        }
        self.status = UserStatus::Suspended;
        self.updated_at = now;
        Ok(())
    }

    pub fn activate(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status == UserStatus::Active {
            return Err(DomainError::invariant("user is already active"));
        }
        self.status = UserStatus::Active;
        self.updated_at = now;
        Ok(())
    }

    pub fn assign_role(&mut self, role: Role, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status == UserStatus::Suspended {
            return Err(DomainError::invariant("user is suspended"));
        }
        if !role.is_known() {
            return Err(DomainError::validation(format!("unknown role '{role}'")));
        }
        if self.roles.contains(&role) {
            return Err(DomainError::conflict(format!("user already has role '{role}'")));
        }
        self.roles.push(role);
        self.updated_at = now;
        Ok(())
    }

    pub fn revoke_role(&mut self, role: &Role, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.roles.contains(role) {
            return Err(DomainError::invariant(format!("user does not have role '{role}'")));
        }
        if self.roles.len() == 1 {
            return Err(DomainError::invariant("cannot revoke the last role"));
        }
        self.roles.retain(|r| r != role);
        self.updated_at = now;
        Ok(())
    }
}

impl Entity for User {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl TenantOwned for User {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}
