//! Encrypted marketplace credentials.
//!
//! Access and refresh tokens are encrypted column by column. The automation
//! login (email + password kept for unattended renewal) is encrypted as one
//! JSON blob inside the metadata document.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use imobcrm_canalpro::Session;
use imobcrm_core::TenantId;

use crate::crypto::{CredentialCipher, CryptoError};
use crate::store::{CredentialRepository, StoreError, StoredCredential};

pub mod renewal;

pub use renewal::{ConnectionStatus, RenewalError, RenewalReport, TokenManager};

/// Provider key of the CanalPro/Gandalf integration.
pub const CANALPRO: &str = "canalpro";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("malformed credential metadata: {0}")]
    Metadata(String),
}

/// Marketplace login kept for unattended renewal.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationLogin {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for AutomationLogin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutomationLogin")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The JSON metadata column. `automation` holds ciphertext.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct CredentialMetadata {
    #[serde(default)]
    device_id: String,
    #[serde(default)]
    account_email: Option<String>,
    #[serde(default)]
    last_renewal_at: Option<DateTime<Utc>>,
    #[serde(default)]
    last_renewal_error: Option<String>,
    #[serde(default)]
    renewal_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    automation: Option<String>,
}

/// Decrypted credentials of one tenant for one provider.
#[derive(Clone, PartialEq)]
pub struct IntegrationCredentials {
    pub tenant_id: TenantId,
    pub provider: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub device_id: String,
    /// Marketplace account the tokens belong to.
    pub account_email: Option<String>,
    pub automation: Option<AutomationLogin>,
    pub last_renewal_at: Option<DateTime<Utc>>,
    pub last_renewal_error: Option<String>,
    /// Consecutive failed renewals; reset on success.
    pub renewal_failures: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for IntegrationCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("provider", &self.provider)
            .field("expires_at", &self.expires_at)
            .field("device_id", &self.device_id)
            .field("account_email", &self.account_email)
            .field("has_automation", &self.automation.is_some())
            .field("renewal_failures", &self.renewal_failures)
            .finish_non_exhaustive()
    }
}

impl IntegrationCredentials {
    pub fn from_session(
        tenant_id: TenantId,
        provider: impl Into<String>,
        session: Session,
        device_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_id,
            provider: provider.into(),
            access_token: session.access_token,
            refresh_token: session.refresh_token,
            expires_at: session.expires_at,
            device_id: device_id.into(),
            account_email: None,
            automation: None,
            last_renewal_at: None,
            last_renewal_error: None,
            renewal_failures: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn session(&self) -> Session {
        Session {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            expires_at: self.expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn expires_within(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.expires_at <= now + window
    }

    /// Replace the tokens after a successful renewal and reset failure tracking.
    pub fn apply_renewal(&mut self, session: Session, now: DateTime<Utc>) {
        self.access_token = session.access_token;
        if session.refresh_token.is_some() {
            self.refresh_token = session.refresh_token;
        }
        self.expires_at = session.expires_at;
        self.last_renewal_at = Some(now);
        self.last_renewal_error = None;
        self.renewal_failures = 0;
        self.updated_at = now;
    }

    pub fn record_failure(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.last_renewal_at = Some(now);
        self.last_renewal_error = Some(error.into());
        self.renewal_failures = self.renewal_failures.saturating_add(1);
        self.updated_at = now;
    }
}

/// Persists `IntegrationCredentials`, encrypting secrets on the way in.
#[derive(Clone)]
pub struct CredentialStore {
    repo: Arc<dyn CredentialRepository>,
    cipher: CredentialCipher,
    provider: String,
}

impl CredentialStore {
    pub fn new(repo: Arc<dyn CredentialRepository>, cipher: CredentialCipher) -> Self {
        Self {
            repo,
            cipher,
            provider: CANALPRO.to_string(),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub async fn save(&self, creds: &IntegrationCredentials) -> Result<(), CredentialError> {
        let automation = match &creds.automation {
            Some(login) => {
                let json = serde_json::to_string(login).map_err(|e| CredentialError::Metadata(e.to_string()))?;
                Some(self.cipher.encrypt(&json)?)
            }
            None => None,
        };
        let metadata = CredentialMetadata {
            device_id: creds.device_id.clone(),
            account_email: creds.account_email.clone(),
            last_renewal_at: creds.last_renewal_at,
            last_renewal_error: creds.last_renewal_error.clone(),
            renewal_failures: creds.renewal_failures,
            automation,
        };

        let row = StoredCredential {
            tenant_id: creds.tenant_id,
            provider: self.provider.clone(),
            access_token: self.cipher.encrypt(&creds.access_token)?,
            refresh_token: self.cipher.encrypt_opt(creds.refresh_token.as_deref())?,
            expires_at: creds.expires_at,
            metadata: serde_json::to_value(&metadata).map_err(|e| CredentialError::Metadata(e.to_string()))?,
            created_at: creds.created_at,
            updated_at: creds.updated_at,
        };
        self.repo.upsert(&row).await?;
        Ok(())
    }

    pub async fn load(&self, tenant_id: TenantId) -> Result<Option<IntegrationCredentials>, CredentialError> {
        match self.repo.get(tenant_id, &self.provider).await? {
            Some(row) => Ok(Some(self.decrypt_row(row)?)),
            None => Ok(None),
        }
    }

    pub async fn remove(&self, tenant_id: TenantId) -> Result<bool, CredentialError> {
        Ok(self.repo.delete(tenant_id, &self.provider).await?)
    }

    /// Credentials expiring within `threshold` of `now`, soonest first.
    ///
    /// Credentials that failed `max_failures` renewals in a row are left out.
    /// Rows that fail to decrypt (e.g. after a key rotation) are logged and skipped.
    pub async fn due_for_renewal(
        &self,
        now: DateTime<Utc>,
        threshold: Duration,
        max_failures: u32,
        limit: u32,
    ) -> Result<Vec<IntegrationCredentials>, CredentialError> {
        let rows = self
            .repo
            .list_expiring(&self.provider, now + threshold, max_failures, limit)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let tenant_id = row.tenant_id;
            match self.decrypt_row(row) {
                Ok(creds) => out.push(creds),
                Err(e) => warn!(tenant_id = %tenant_id, error = %e, "skipping undecryptable credentials"),
            }
        }
        Ok(out)
    }

    fn decrypt_row(&self, row: StoredCredential) -> Result<IntegrationCredentials, CredentialError> {
        let metadata: CredentialMetadata =
            serde_json::from_value(row.metadata).map_err(|e| CredentialError::Metadata(e.to_string()))?;
        let automation = match metadata.automation.as_deref() {
            Some(sealed) => {
                let json = self.cipher.decrypt(sealed)?;
                Some(serde_json::from_str(&json).map_err(|e| CredentialError::Metadata(e.to_string()))?)
            }
            None => None,
        };

        Ok(IntegrationCredentials {
            tenant_id: row.tenant_id,
            provider: row.provider,
            access_token: self.cipher.decrypt(&row.access_token)?,
            refresh_token: self.cipher.decrypt_opt(row.refresh_token.as_deref())?,
            expires_at: row.expires_at,
            device_id: metadata.device_id,
            account_email: metadata.account_email,
            automation,
            last_renewal_at: metadata.last_renewal_at,
            last_renewal_error: metadata.last_renewal_error,
            renewal_failures: metadata.renewal_failures,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryCredentialRepository;

    fn store() -> (CredentialStore, Arc<InMemoryCredentialRepository>) {
        let repo = Arc::new(InMemoryCredentialRepository::new());
        let store = CredentialStore::new(repo.clone(), CredentialCipher::new([5u8; 32]));
        (store, repo)
    }

    fn creds(tenant: TenantId, expires_at: DateTime<Utc>) -> IntegrationCredentials {
        let now = Utc::now();
        let mut c = IntegrationCredentials::from_session(
            tenant,
            CANALPRO,
            Session {
                access_token: "access-1".into(),
                refresh_token: Some("refresh-1".into()),
                expires_at,
            },
            "device-1",
            now,
        );
        c.account_email = Some("agent@imob.com.br".into());
        c.automation = Some(AutomationLogin {
            email: "agent@imob.com.br".into(),
            password: "hunter22".into(),
        });
        c
    }

    #[tokio::test]
    async fn secrets_are_encrypted_at_rest() {
        let (store, repo) = store();
        let tenant = TenantId::new();
        let original = creds(tenant, Utc::now() + Duration::hours(1));
        store.save(&original).await.unwrap();

        let raw = repo.get(tenant, CANALPRO).await.unwrap().unwrap();
        assert_ne!(raw.access_token, "access-1");
        assert_ne!(raw.refresh_token.as_deref(), Some("refresh-1"));
        let meta = raw.metadata.to_string();
        assert!(!meta.contains("hunter22"));
        assert!(meta.contains("device-1"));

        let loaded = store.load(tenant).await.unwrap().unwrap();
        assert_eq!(loaded, original);
    }

    #[tokio::test]
    async fn wrong_key_cannot_load() {
        let (store, repo) = store();
        let tenant = TenantId::new();
        store.save(&creds(tenant, Utc::now())).await.unwrap();

        let other = CredentialStore::new(repo, CredentialCipher::new([6u8; 32]));
        assert!(matches!(other.load(tenant).await, Err(CredentialError::Crypto(_))));
    }

    #[tokio::test]
    async fn due_for_renewal_uses_threshold() {
        let (store, _) = store();
        let now = Utc::now();
        let soon = TenantId::new();
        let later = TenantId::new();
        store.save(&creds(soon, now + Duration::minutes(5))).await.unwrap();
        store.save(&creds(later, now + Duration::hours(5))).await.unwrap();

        let due = store.due_for_renewal(now, Duration::minutes(15), 3, 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].tenant_id, soon);
    }

    #[tokio::test]
    async fn remove_deletes_only_that_tenant() {
        let (store, _) = store();
        let a = TenantId::new();
        let b = TenantId::new();
        store.save(&creds(a, Utc::now())).await.unwrap();
        store.save(&creds(b, Utc::now())).await.unwrap();

        assert!(store.remove(a).await.unwrap());
        assert!(store.load(a).await.unwrap().is_none());
        assert!(store.load(b).await.unwrap().is_some());
    }

    #[test]
    fn renewal_bookkeeping() {
        let now = Utc::now();
        let mut c = creds(TenantId::new(), now);
        c.record_failure("boom", now);
        c.record_failure("boom again", now);
        assert_eq!(c.renewal_failures, 2);

        c.apply_renewal(
            Session {
                access_token: "access-2".into(),
                refresh_token: None,
                expires_at: now + Duration::hours(1),
            },
            now,
        );
        assert_eq!(c.renewal_failures, 0);
        assert!(c.last_renewal_error.is_none());
        // The refresh token is kept when the marketplace does not rotate it.
        assert_eq!(c.refresh_token.as_deref(), Some("refresh-1"));
        assert!(!c.is_expired(now));
    }
}
