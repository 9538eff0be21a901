//! Marketplace session lifecycle: connect, renew, disconnect.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use imobcrm_canalpro::{ApiAuth, CanalProError, MarketplaceApi, Session};
use imobcrm_core::{RetryPolicy, TenantId};

use super::{AutomationLogin, CredentialError, CredentialStore, IntegrationCredentials};
use crate::config::RenewalConfig;

/// Tokens closer than this to expiry are renewed before use.
const SESSION_SKEW_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum RenewalError {
    #[error("marketplace account is not connected")]
    NotConnected,

    /// Neither the refresh token nor the automation login was accepted.
    #[error("marketplace rejected the stored credentials: {0}")]
    Rejected(String),

    #[error(transparent)]
    Api(CanalProError),

    #[error(transparent)]
    Credentials(#[from] CredentialError),
}

/// Summary of one background renewal pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenewalReport {
    pub scanned: u32,
    pub renewed: u32,
    pub failed: u32,
}

/// Non-secret view of a tenant's connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub provider: String,
    pub account_email: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub expired: bool,
    pub automatic_renewal: bool,
    pub last_renewal_at: Option<DateTime<Utc>>,
    pub last_renewal_error: Option<String>,
    pub renewal_failures: u32,
    pub connected_at: DateTime<Utc>,
}

/// Owns every marketplace session of every tenant.
///
/// Renewals of one tenant are serialized: concurrent callers wait for the
/// renewal in flight and reuse its result.
pub struct TokenManager {
    api: Arc<dyn MarketplaceApi>,
    store: CredentialStore,
    config: RenewalConfig,
    locks: Mutex<HashMap<TenantId, Arc<tokio::sync::Mutex<()>>>>,
}

impl TokenManager {
    pub fn new(api: Arc<dyn MarketplaceApi>, store: CredentialStore, config: RenewalConfig) -> Self {
        Self {
            api,
            store,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RenewalConfig {
        &self.config
    }

    fn lock_for(&self, tenant_id: TenantId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(tenant_id).or_default().clone()
    }

    /// Log in with the tenant's marketplace account and store the session.
    ///
    /// With `remember`, the login is kept (encrypted) so the session can be
    /// re-established without the user when the refresh token stops working.
    #[instrument(skip(self, password), fields(tenant_id = %tenant_id))]
    pub async fn connect(
        &self,
        tenant_id: TenantId,
        email: &str,
        password: &str,
        remember: bool,
    ) -> Result<IntegrationCredentials, RenewalError> {
        let lock = self.lock_for(tenant_id);
        let _guard = lock.lock().await;

        let existing = self.store.load(tenant_id).await.ok().flatten();
        let device_id = existing
            .as_ref()
            .map(|c| c.device_id.clone())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| Uuid::now_v7().to_string());

        let session = self
            .with_retry("login", || self.api.login(email, password, &device_id))
            .await
            .map_err(|e| match e {
                CanalProError::Unauthorized(msg) => RenewalError::Rejected(msg),
                other => RenewalError::Api(other),
            })?;

        let now = Utc::now();
        let mut creds = IntegrationCredentials::from_session(tenant_id, self.store.provider(), session, device_id, now);
        if let Some(previous) = existing {
            creds.created_at = previous.created_at;
        }
        creds.account_email = Some(email.to_string());
        creds.automation = remember.then(|| AutomationLogin {
            email: email.to_string(),
            password: password.to_string(),
        });
        creds.last_renewal_at = Some(now);

        self.store.save(&creds).await?;
        info!(expires_at = %creds.expires_at, remember, "marketplace account connected");
        Ok(creds)
    }

    /// A usable session for API calls, renewed first when about to expire.
    pub async fn session(&self, tenant_id: TenantId) -> Result<ApiAuth, RenewalError> {
        let creds = self.store.load(tenant_id).await?.ok_or(RenewalError::NotConnected)?;
        if !creds.expires_within(Utc::now(), Duration::seconds(SESSION_SKEW_SECS)) {
            return Ok(ApiAuth::new(creds.access_token, creds.device_id));
        }

        debug!(tenant_id = %tenant_id, "session about to expire; renewing before use");
        match self.renew(tenant_id).await {
            Ok(renewed) => Ok(ApiAuth::new(renewed.access_token, renewed.device_id)),
            Err(err) if !creds.is_expired(Utc::now()) => {
                warn!(tenant_id = %tenant_id, error = %err, "renewal failed; using the current session until it expires");
                Ok(ApiAuth::new(creds.access_token, creds.device_id))
            }
            Err(err) => Err(err),
        }
    }

    /// Renew the tenant's session now.
    ///
    /// Tries the refresh grant first; when the marketplace rejects it, falls
    /// back to the stored automation login. Failures are recorded on the
    /// credential row.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn renew(&self, tenant_id: TenantId) -> Result<IntegrationCredentials, RenewalError> {
        let requested_at = Utc::now();
        let lock = self.lock_for(tenant_id);
        let _guard = lock.lock().await;

        let mut creds = self.store.load(tenant_id).await?.ok_or(RenewalError::NotConnected)?;

        // Someone renewed while we waited for the lock.
        let fresh = creds.last_renewal_at.is_some_and(|t| t > requested_at)
            && creds.last_renewal_error.is_none()
            && !creds.expires_within(Utc::now(), Duration::seconds(SESSION_SKEW_SECS));
        if fresh {
            debug!("reusing session renewed by a concurrent caller");
            return Ok(creds);
        }

        let outcome = self.obtain_session(&creds).await;
        let now = Utc::now();
        match outcome {
            Ok(session) => {
                creds.apply_renewal(session, now);
                self.store.save(&creds).await?;
                info!(expires_at = %creds.expires_at, "marketplace session renewed");
                Ok(creds)
            }
            Err(err) => {
                creds.record_failure(err.to_string(), now);
                self.store.save(&creds).await?;
                warn!(failures = creds.renewal_failures, error = %err, "marketplace session renewal failed");
                Err(err)
            }
        }
    }

    async fn obtain_session(&self, creds: &IntegrationCredentials) -> Result<Session, RenewalError> {
        let device_id = creds.device_id.as_str();

        if let Some(refresh_token) = creds.refresh_token.as_deref() {
            match self
                .with_retry("refresh_token", || self.api.refresh_session(refresh_token, device_id))
                .await
            {
                Ok(session) => return Ok(session),
                Err(e) if e.is_unauthorized() => {
                    debug!(error = %e, "refresh token rejected");
                }
                Err(e) => return Err(RenewalError::Api(e)),
            }
        }

        let Some(login) = creds.automation.as_ref() else {
            return Err(RenewalError::Rejected(
                "refresh token unusable and no automation login stored".into(),
            ));
        };

        info!("falling back to automation login");
        self.with_retry("login", || self.api.login(&login.email, &login.password, device_id))
            .await
            .map_err(|e| match e {
                CanalProError::Unauthorized(msg) => RenewalError::Rejected(msg),
                other => RenewalError::Api(other),
            })
    }

    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, CanalProError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CanalProError>>,
    {
        let policy: &RetryPolicy = &self.config.retry;
        let mut attempt = 0u32;
        loop {
            match call().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && policy.should_retry(attempt) => {
                    attempt += 1;
                    let delay = policy.delay_for_attempt(attempt);
                    warn!(operation, attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying marketplace call");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Renew every credential expiring within the configured threshold.
    ///
    /// Credentials with `max_failures` consecutive failures are not picked up
    /// until a successful `connect` or `renew` resets their count.
    #[instrument(skip(self))]
    pub async fn renewal_pass(&self, now: DateTime<Utc>) -> Result<RenewalReport, RenewalError> {
        let due = self
            .store
            .due_for_renewal(now, self.config.threshold, self.config.max_failures, self.config.batch_size)
            .await?;

        let mut report = RenewalReport::default();
        for creds in due {
            report.scanned += 1;
            match self.renew(creds.tenant_id).await {
                Ok(_) => report.renewed += 1,
                Err(_) => report.failed += 1,
            }
        }

        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                renewed = report.renewed,
                failed = report.failed,
                "token renewal pass finished"
            );
        }
        Ok(report)
    }

    pub async fn status(&self, tenant_id: TenantId) -> Result<Option<ConnectionStatus>, RenewalError> {
        let now = Utc::now();
        Ok(self.store.load(tenant_id).await?.map(|c| ConnectionStatus {
            provider: c.provider.clone(),
            account_email: c.account_email.clone(),
            expires_at: c.expires_at,
            expired: c.is_expired(now),
            automatic_renewal: c.automation.is_some(),
            last_renewal_at: c.last_renewal_at,
            last_renewal_error: c.last_renewal_error.clone(),
            renewal_failures: c.renewal_failures,
            connected_at: c.created_at,
        }))
    }

    /// Forget the tenant's marketplace session and automation login.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn disconnect(&self, tenant_id: TenantId) -> Result<bool, RenewalError> {
        let lock = self.lock_for(tenant_id);
        let _guard = lock.lock().await;
        let removed = self.store.remove(tenant_id).await?;
        if removed {
            info!("marketplace account disconnected");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CredentialCipher;
    use crate::store::InMemoryCredentialRepository;
    use imobcrm_canalpro::InMemoryMarketplace;
    use std::time::Duration as StdDuration;

    const EMAIL: &str = "corretor@imob.com.br";
    const PASSWORD: &str = "s3nha-forte";

    fn config() -> RenewalConfig {
        RenewalConfig {
            retry: RetryPolicy::fixed(2, StdDuration::from_millis(1)),
            max_failures: 2,
            ..RenewalConfig::default()
        }
    }

    fn manager(market: Arc<InMemoryMarketplace>) -> TokenManager {
        let store = CredentialStore::new(
            Arc::new(InMemoryCredentialRepository::new()),
            CredentialCipher::new([4u8; 32]),
        );
        TokenManager::new(market, store, config())
    }

    #[tokio::test]
    async fn connect_then_session() {
        let market = Arc::new(InMemoryMarketplace::new().with_account(EMAIL, PASSWORD));
        let tokens = manager(market.clone());
        let tenant = TenantId::new();

        let creds = tokens.connect(tenant, EMAIL, PASSWORD, true).await.unwrap();
        let auth = tokens.session(tenant).await.unwrap();
        assert_eq!(auth.access_token, creds.access_token);
        assert_eq!(auth.device_id, creds.device_id);
        assert_eq!(market.calls("refresh_token"), 0);
    }

    #[tokio::test]
    async fn connect_with_bad_password_is_rejected() {
        let market = Arc::new(InMemoryMarketplace::new().with_account(EMAIL, PASSWORD));
        let tokens = manager(market);
        let err = tokens.connect(TenantId::new(), EMAIL, "wrong", false).await.unwrap_err();
        assert!(matches!(err, RenewalError::Rejected(_)));
    }

    #[tokio::test]
    async fn session_without_connection_fails() {
        let tokens = manager(Arc::new(InMemoryMarketplace::new()));
        assert!(matches!(tokens.session(TenantId::new()).await, Err(RenewalError::NotConnected)));
    }

    #[tokio::test]
    async fn renew_uses_refresh_token() {
        let market = Arc::new(InMemoryMarketplace::new().with_account(EMAIL, PASSWORD));
        let tokens = manager(market.clone());
        let tenant = TenantId::new();
        let first = tokens.connect(tenant, EMAIL, PASSWORD, false).await.unwrap();

        let renewed = tokens.renew(tenant).await.unwrap();
        assert_ne!(renewed.access_token, first.access_token);
        assert_eq!(market.calls("refresh_token"), 1);
        assert_eq!(market.calls("login"), 1);
    }

    #[tokio::test]
    async fn rejected_refresh_falls_back_to_automation_login() {
        let market = Arc::new(InMemoryMarketplace::new().with_account(EMAIL, PASSWORD));
        let tokens = manager(market.clone());
        let tenant = TenantId::new();
        tokens.connect(tenant, EMAIL, PASSWORD, true).await.unwrap();

        market.revoke_refresh_tokens();
        let renewed = tokens.renew(tenant).await.unwrap();
        assert_eq!(renewed.renewal_failures, 0);
        assert_eq!(market.calls("login"), 2);
    }

    #[tokio::test]
    async fn rejected_refresh_without_automation_records_failure() {
        let market = Arc::new(InMemoryMarketplace::new().with_account(EMAIL, PASSWORD));
        let tokens = manager(market.clone());
        let tenant = TenantId::new();
        tokens.connect(tenant, EMAIL, PASSWORD, false).await.unwrap();

        market.revoke_refresh_tokens();
        let err = tokens.renew(tenant).await.unwrap_err();
        assert!(matches!(err, RenewalError::Rejected(_)));

        let status = tokens.status(tenant).await.unwrap().unwrap();
        assert_eq!(status.renewal_failures, 1);
        assert!(status.last_renewal_error.is_some());
    }

    #[tokio::test]
    async fn transient_errors_are_retried_within_policy() {
        let market = Arc::new(InMemoryMarketplace::new().with_account(EMAIL, PASSWORD));
        let tokens = manager(market.clone());
        let tenant = TenantId::new();
        tokens.connect(tenant, EMAIL, PASSWORD, false).await.unwrap();

        market.fail_next(CanalProError::Transport("reset".into()));
        market.fail_next(CanalProError::RateLimited);
        assert!(tokens.renew(tenant).await.is_ok());

        for _ in 0..3 {
            market.fail_next(CanalProError::Transport("down".into()));
        }
        let err = tokens.renew(tenant).await.unwrap_err();
        assert!(matches!(err, RenewalError::Api(CanalProError::Transport(_))));
    }

    #[tokio::test]
    async fn renewal_pass_skips_after_max_failures() {
        let market = Arc::new(
            InMemoryMarketplace::new()
                .with_account(EMAIL, PASSWORD)
                .with_session_ttl(chrono::Duration::minutes(5)),
        );
        let tokens = manager(market.clone());
        let tenant = TenantId::new();
        tokens.connect(tenant, EMAIL, PASSWORD, false).await.unwrap();
        market.revoke_refresh_tokens();

        let now = Utc::now();
        let first = tokens.renewal_pass(now).await.unwrap();
        assert_eq!((first.scanned, first.failed), (1, 1));
        tokens.renewal_pass(now).await.unwrap();

        let third = tokens.renewal_pass(now).await.unwrap();
        assert_eq!(third, RenewalReport::default());
        assert_eq!(market.calls("refresh_token"), 2);
    }

    #[tokio::test]
    async fn exhausted_credentials_do_not_starve_healthy_ones() {
        const OTHER_EMAIL: &str = "vendas@imob.com.br";
        let market = Arc::new(
            InMemoryMarketplace::new()
                .with_account(EMAIL, PASSWORD)
                .with_account(OTHER_EMAIL, PASSWORD)
                .with_session_ttl(chrono::Duration::minutes(5)),
        );
        let store = CredentialStore::new(
            Arc::new(InMemoryCredentialRepository::new()),
            CredentialCipher::new([4u8; 32]),
        );
        let tokens = TokenManager::new(
            market.clone(),
            store,
            RenewalConfig {
                batch_size: 1,
                max_failures: 1,
                ..config()
            },
        );

        let dead = TenantId::new();
        tokens.connect(dead, EMAIL, PASSWORD, false).await.unwrap();
        market.revoke_refresh_tokens();
        let first = tokens.renewal_pass(Utc::now()).await.unwrap();
        assert_eq!((first.scanned, first.failed), (1, 1));

        let healthy = TenantId::new();
        tokens.connect(healthy, OTHER_EMAIL, PASSWORD, false).await.unwrap();

        let second = tokens.renewal_pass(Utc::now()).await.unwrap();
        assert_eq!((second.scanned, second.renewed), (1, 1));
        assert_eq!(market.calls("refresh_token"), 2);
        assert!(tokens.status(healthy).await.unwrap().unwrap().last_renewal_error.is_none());
        assert_eq!(tokens.status(dead).await.unwrap().unwrap().renewal_failures, 1);
    }

    #[tokio::test]
    async fn failed_early_renewal_keeps_the_unexpired_session() {
        let market = Arc::new(
            InMemoryMarketplace::new()
                .with_account(EMAIL, PASSWORD)
                .with_session_ttl(chrono::Duration::seconds(30)),
        );
        let tokens = manager(market.clone());
        let tenant = TenantId::new();
        let creds = tokens.connect(tenant, EMAIL, PASSWORD, false).await.unwrap();

        market.revoke_refresh_tokens();
        let auth = tokens.session(tenant).await.unwrap();
        assert_eq!(auth.access_token, creds.access_token);
        assert_eq!(market.calls("refresh_token"), 1);
    }

    #[tokio::test]
    async fn concurrent_renewals_share_one_refresh() {
        let market = Arc::new(InMemoryMarketplace::new().with_account(EMAIL, PASSWORD));
        let tokens = Arc::new(manager(market.clone()));
        let tenant = TenantId::new();
        tokens.connect(tenant, EMAIL, PASSWORD, false).await.unwrap();

        // Hold the tenant lock so both renewals queue behind it.
        let lock = tokens.lock_for(tenant);
        let guard = lock.lock().await;

        let a = tokio::spawn({
            let tokens = tokens.clone();
            async move { tokens.renew(tenant).await.map(|c| c.access_token) }
        });
        let b = tokio::spawn({
            let tokens = tokens.clone();
            async move { tokens.renew(tenant).await.map(|c| c.access_token) }
        });
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        drop(guard);

        let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());

        assert_eq!(a, b);
        assert_eq!(market.calls("refresh_token"), 1);
    }

    #[tokio::test]
    async fn disconnect_forgets_credentials() {
        let market = Arc::new(InMemoryMarketplace::new().with_account(EMAIL, PASSWORD));
        let tokens = manager(market);
        let tenant = TenantId::new();
        tokens.connect(tenant, EMAIL, PASSWORD, true).await.unwrap();

        assert!(tokens.disconnect(tenant).await.unwrap());
        assert!(tokens.status(tenant).await.unwrap().is_none());
        assert!(!tokens.disconnect(tenant).await.unwrap());
    }
}
