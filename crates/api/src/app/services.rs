//! Service wiring shared by every handler.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use imobcrm_auth::Hs256Jwt;
use imobcrm_canalpro::{GandalfClient, MarketplaceApi};
use imobcrm_core::TenantId;
use imobcrm_infra::{
    AppConfig, CredentialCipher, CredentialStore, Database, ListingSync, RefreshConfig, RefreshScheduler,
    RenewalConfig, Stores, TaskHandle, TokenManager, spawn_periodic,
};
use imobcrm_tenancy::{Resource, Subscription};

use crate::app::errors::{ApiError, ApiResult};

pub struct AppServices {
    pub stores: Stores,
    pub jwt: Arc<Hs256Jwt>,
    pub tokens: Arc<TokenManager>,
    pub sync: Arc<ListingSync>,
    pub scheduler: RefreshScheduler,
}

impl AppServices {
    pub fn new(
        stores: Stores,
        api: Arc<dyn MarketplaceApi>,
        cipher: CredentialCipher,
        jwt: Hs256Jwt,
        renewal: RenewalConfig,
        refresh: RefreshConfig,
    ) -> Self {
        let tokens = Arc::new(TokenManager::new(
            api.clone(),
            CredentialStore::new(stores.credentials.clone(), cipher),
            renewal,
        ));
        let sync = Arc::new(ListingSync::new(
            api,
            tokens.clone(),
            stores.properties.clone(),
            stores.subscriptions.clone(),
        ));
        let scheduler = RefreshScheduler::new(
            stores.schedules.clone(),
            stores.refresh_log.clone(),
            stores.properties.clone(),
            sync.clone(),
            refresh,
        );

        Self {
            stores,
            jwt: Arc::new(jwt),
            tokens,
            sync,
            scheduler,
        }
    }

    /// Production wiring: Postgres when configured, the Gandalf HTTP client.
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let stores = match &config.database_url {
            Some(url) => {
                let db = Database::connect(url).await?;
                db.run_migrations().await?;
                info!("using postgres stores");
                Stores::postgres(db.pool())
            }
            None => {
                info!("DATABASE_URL not set; using in-memory stores");
                Stores::in_memory()
            }
        };
        let api: Arc<dyn MarketplaceApi> = Arc::new(GandalfClient::new(config.canalpro.clone())?);
        let cipher = CredentialCipher::from_key_material(&config.credentials_key)?;
        let jwt = Hs256Jwt::new(config.jwt_secret.as_bytes(), config.jwt_ttl);

        Ok(Self::new(
            stores,
            api,
            cipher,
            jwt,
            config.renewal.clone(),
            config.refresh.clone(),
        ))
    }

    /// In-memory stores against the given marketplace.
    pub fn in_memory(jwt_secret: &str, api: Arc<dyn MarketplaceApi>) -> Self {
        Self::new(
            Stores::in_memory(),
            api,
            CredentialCipher::new([7u8; 32]),
            Hs256Jwt::new(jwt_secret.as_bytes(), chrono::Duration::hours(8)),
            RenewalConfig::default(),
            RefreshConfig::default(),
        )
    }

    /// Start the token renewal pass and the refresh beat.
    pub fn spawn_background(&self) -> Vec<TaskHandle> {
        let tokens = self.tokens.clone();
        let renewal = spawn_periodic("token-renewal", tokens.config().interval, move || {
            let tokens = tokens.clone();
            async move { tokens.renewal_pass(Utc::now()).await }
        });

        let scheduler = self.scheduler.clone();
        let beat = spawn_periodic("refresh-beat", scheduler.config().interval, move || {
            let scheduler = scheduler.clone();
            async move { scheduler.tick(Utc::now()).await }
        });

        vec![renewal, beat]
    }

    /// Stop the background tasks, then wait up to the configured drain
    /// timeout for dispatched refresh jobs. Returns false when jobs were
    /// still running at the deadline.
    pub async fn shutdown(&self, tasks: Vec<TaskHandle>) -> bool {
        for task in tasks {
            info!(task = task.name(), "stopping background task");
            task.shutdown().await;
        }

        let timeout = self.scheduler.config().drain_timeout;
        match tokio::time::timeout(timeout, self.scheduler.wait_idle()).await {
            Ok(()) => true,
            Err(_) => {
                let stats = self.scheduler.stats();
                warn!(?timeout, ?stats, "refresh jobs still running at shutdown");
                false
            }
        }
    }

    pub async fn subscription(&self, tenant_id: TenantId) -> ApiResult<Subscription> {
        self.stores
            .subscriptions
            .get(tenant_id)
            .await?
            .ok_or_else(|| ApiError::not_found("subscription"))
    }

    /// Fail with `plan_limit_exceeded` when adding one more `resource` would
    /// exceed the tenant's plan.
    pub async fn ensure_capacity(&self, tenant_id: TenantId, resource: Resource) -> ApiResult<()> {
        let subscription = self.subscription(tenant_id).await?;
        let current = match resource {
            Resource::Properties => self.stores.properties.count(tenant_id).await?,
            Resource::Users => self.stores.users.count(tenant_id).await?,
            Resource::Schedules => self.stores.schedules.count(tenant_id).await?,
        };
        subscription.ensure_capacity(resource, current)?;
        Ok(())
    }
}
