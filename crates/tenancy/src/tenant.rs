use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use imobcrm_core::{DomainError, DomainResult, Entity, TenantId, text_enum};

text_enum! {
    #[derive(Default)]
    pub enum TenantStatus {
        #[default]
        Active => "active",
        Suspended => "suspended",
    }
}

/// A customer organization (real-estate agency).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    /// URL-safe unique handle derived from the name.
    pub slug: String,
    pub status: TenantStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lowercase ASCII slug; Portuguese accents are folded.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars().flat_map(char::to_lowercase) {
        let c = match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        };
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c);
        } else {
            pending_dash = true;
        }
    }
    out
}

impl Tenant {
    pub fn create(name: &str, now: DateTime<Utc>) -> DomainResult<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("tenant name is required"));
        }
        let slug = slugify(name);
        if slug.is_empty() {
            return Err(DomainError::validation("tenant name must contain letters or digits"));
        }
        Ok(Self {
            id: TenantId::new(),
            name: name.to_string(),
            slug,
            status: TenantStatus::Active,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }

    pub fn suspend(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status == TenantStatus::Suspended {
            return Err(DomainError::invariant("tenant is already suspended"));
        }
        self.status = TenantStatus::Suspended;
        self.updated_at = now;
        Ok(())
    }

    pub fn activate(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status == TenantStatus::Active {
            return Err(DomainError::invariant("tenant is already active"));
        }
        self.status = TenantStatus::Active;
        self.updated_at = now;
        Ok(())
    }
}

impl Entity for Tenant {
    type Id = TenantId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
