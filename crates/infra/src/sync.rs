//! Listing synchronization with the marketplace.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use imobcrm_canalpro::{
    ApiAuth, CanalProError, MarketplaceApi, from_remote_listing, to_listing_input,
};
use imobcrm_core::{DomainError, PropertyId, TenantId};
use imobcrm_listings::{ListingStatus, Property, SyncStatus};
use imobcrm_tenancy::Resource;

use crate::credentials::{RenewalError, TokenManager};
use crate::store::{PropertyRepository, StoreError, SubscriptionRepository};

const IMPORT_PAGE_SIZE: u32 = 50;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("property not found")]
    PropertyNotFound,

    #[error("property is not published on the marketplace")]
    NotPublished,

    #[error(transparent)]
    Renewal(#[from] RenewalError),

    #[error(transparent)]
    Api(#[from] CanalProError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Failures that say nothing about the listing itself.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Api(e) => e.is_transient(),
            SyncError::Renewal(RenewalError::Api(e)) => e.is_transient(),
            SyncError::Store(StoreError::Backend { .. }) => true,
            _ => false,
        }
    }
}

/// Outcome of pulling the account's marketplace listings into the CRM.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub fetched: u32,
    pub imported: u32,
    /// Remote listings already linked to a local property.
    pub already_linked: u32,
    /// Remote listings whose data could not be mapped.
    pub invalid: u32,
    /// Stopped early because the plan's property quota was reached.
    pub limit_reached: bool,
    pub imported_ids: Vec<PropertyId>,
}

/// Keeps local listings and their marketplace copies in step.
///
/// Every marketplace call authenticates through the tenant's session; a call
/// rejected as unauthorized is retried once after renewing it.
pub struct ListingSync {
    api: Arc<dyn MarketplaceApi>,
    tokens: Arc<TokenManager>,
    properties: Arc<dyn PropertyRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
}

impl ListingSync {
    pub fn new(
        api: Arc<dyn MarketplaceApi>,
        tokens: Arc<TokenManager>,
        properties: Arc<dyn PropertyRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
    ) -> Self {
        Self {
            api,
            tokens,
            properties,
            subscriptions,
        }
    }

    /// Fail unless the tenant's subscription currently includes marketplace sync.
    pub async fn ensure_entitled(&self, tenant_id: TenantId, now: DateTime<Utc>) -> Result<(), SyncError> {
        let subscription = self
            .subscriptions
            .get(tenant_id)
            .await?
            .ok_or_else(|| DomainError::limit_exceeded("tenant has no subscription"))?;
        subscription.ensure_marketplace_sync(now)?;
        Ok(())
    }

    async fn load(&self, tenant_id: TenantId, property_id: PropertyId) -> Result<Property, SyncError> {
        self.properties
            .get(tenant_id, property_id)
            .await?
            .ok_or(SyncError::PropertyNotFound)
    }

    async fn with_auth<T, F, Fut>(&self, tenant_id: TenantId, mut call: F) -> Result<T, SyncError>
    where
        F: FnMut(ApiAuth) -> Fut,
        Fut: Future<Output = Result<T, CanalProError>>,
    {
        let auth = self.tokens.session(tenant_id).await?;
        match call(auth).await {
            Err(e) if e.is_unauthorized() => {
                debug!(tenant_id = %tenant_id, error = %e, "access token rejected; renewing session");
                let creds = self.tokens.renew(tenant_id).await?;
                Ok(call(ApiAuth::new(creds.access_token, creds.device_id)).await?)
            }
            other => Ok(other?),
        }
    }

    /// Create or update the property's marketplace listing.
    ///
    /// The property must be active. Its sync status ends up `synced` or
    /// `failed`; on failure the error is returned too.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, property_id = %property_id))]
    pub async fn publish(&self, tenant_id: TenantId, property_id: PropertyId) -> Result<Property, SyncError> {
        let mut property = self.load(tenant_id, property_id).await?;
        property.ensure_publishable()?;
        self.ensure_entitled(tenant_id, Utc::now()).await?;

        property.mark_sync_pending(Utc::now());
        self.properties.update_sync(&property).await?;

        let input = to_listing_input(&property);
        let api = &self.api;
        let input = &input;
        let result = match property.external_id.clone() {
            Some(external_id) => {
                let updated = self
                    .with_auth(tenant_id, |auth| {
                        let external_id = external_id.clone();
                        async move { api.update_listing(&auth, &external_id, input).await }
                    })
                    .await;
                match updated {
                    Ok(()) => Ok(external_id),
                    Err(SyncError::Api(CanalProError::NotFound(_))) => {
                        warn!(external_id = %external_id, "remote listing disappeared; publishing a new one");
                        self.with_auth(tenant_id, |auth| async move { api.create_listing(&auth, input).await })
                            .await
                    }
                    Err(e) => Err(e),
                }
            }
            None => {
                self.with_auth(tenant_id, |auth| async move { api.create_listing(&auth, input).await })
                    .await
            }
        };

        self.settle(property, result).await
    }

    /// Record the marketplace outcome on the property.
    ///
    /// Only the sync columns are written, so edits saved while the call was in
    /// flight survive. Returns the stored row.
    async fn settle(&self, mut property: Property, result: Result<String, SyncError>) -> Result<Property, SyncError> {
        let now = Utc::now();
        match result {
            Ok(external_id) => {
                property.mark_synced(external_id, now);
                self.properties.update_sync(&property).await?;
                info!(external_id = property.external_id.as_deref().unwrap_or_default(), "listing synced");
                self.load(property.tenant_id, property.id).await
            }
            Err(err) => {
                property.mark_sync_failed(err.to_string(), now);
                self.properties.update_sync(&property).await?;
                warn!(error = %err, "listing sync failed");
                Err(err)
            }
        }
    }

    /// Remove the property's marketplace listing.
    ///
    /// A listing the marketplace no longer knows counts as removed.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, property_id = %property_id))]
    pub async fn unpublish(&self, tenant_id: TenantId, property_id: PropertyId) -> Result<Property, SyncError> {
        let mut property = self.load(tenant_id, property_id).await?;
        let external_id = property.external_id.clone().ok_or(SyncError::NotPublished)?;

        let api = &self.api;
        let deleted = self
            .with_auth(tenant_id, |auth| {
                let external_id = external_id.clone();
                async move { api.delete_listing(&auth, &external_id).await }
            })
            .await;
        match deleted {
            Ok(()) => {}
            Err(SyncError::Api(CanalProError::NotFound(_))) => {
                debug!(external_id = %external_id, "remote listing already gone");
            }
            Err(err) => {
                property.mark_sync_failed(err.to_string(), Utc::now());
                self.properties.update_sync(&property).await?;
                return Err(err);
            }
        }

        property.mark_unpublished(Utc::now());
        self.properties.update_sync(&property).await?;
        info!(external_id = %external_id, "listing unpublished");
        self.load(tenant_id, property_id).await
    }

    /// Bump the property's listing on the marketplace.
    ///
    /// Pending local edits are pushed first so the bumped listing is current.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, property_id = %property_id))]
    pub async fn republish(&self, tenant_id: TenantId, property_id: PropertyId) -> Result<Property, SyncError> {
        let property = self.load(tenant_id, property_id).await?;
        self.republish_loaded(property).await
    }

    pub(crate) async fn republish_loaded(&self, property: Property) -> Result<Property, SyncError> {
        let tenant_id = property.tenant_id;
        let Some(external_id) = property.external_id.clone() else {
            return Err(SyncError::NotPublished);
        };
        self.ensure_entitled(tenant_id, Utc::now()).await?;

        let property = if property.sync_status == SyncStatus::Outdated {
            self.publish(tenant_id, property.id).await?
        } else {
            property
        };
        // `publish` may have re-created a listing that vanished remotely.
        let external_id = property.external_id.clone().unwrap_or(external_id);

        let api = &self.api;
        let result = self
            .with_auth(tenant_id, |auth| {
                let external_id = external_id.clone();
                async move { api.republish_listing(&auth, &external_id).await }
            })
            .await
            .map(|_| external_id.clone());
        self.settle(property, result).await
    }

    /// Pull every listing of the connected marketplace account into the CRM.
    ///
    /// Imported properties are active and linked to their remote listing.
    /// Listings that cannot be mapped are counted and skipped.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn import_remote(&self, tenant_id: TenantId) -> Result<ImportReport, SyncError> {
        self.ensure_entitled(tenant_id, Utc::now()).await?;
        let subscription = self.subscriptions.get(tenant_id).await?;

        let mut report = ImportReport::default();
        let mut count = self.properties.count(tenant_id).await?;
        let api = &self.api;
        let mut page = 1u32;
        loop {
            let listings = self
                .with_auth(tenant_id, |auth| async move {
                    api.list_listings(&auth, page, IMPORT_PAGE_SIZE).await
                })
                .await?;

            for remote in &listings.items {
                report.fetched += 1;
                if self.properties.find_by_external_id(tenant_id, &remote.id).await?.is_some() {
                    report.already_linked += 1;
                    continue;
                }
                if let Some(sub) = &subscription {
                    if sub.ensure_capacity(Resource::Properties, count).is_err() {
                        report.limit_reached = true;
                        break;
                    }
                }

                let now = Utc::now();
                let property = from_remote_listing(remote).and_then(|draft| {
                    let mut property = Property::create(tenant_id, draft, now)?;
                    property.status = ListingStatus::Active;
                    property.mark_synced(remote.id.clone(), now);
                    Ok(property)
                });
                match property {
                    Ok(property) => {
                        self.properties.insert(&property).await?;
                        count += 1;
                        report.imported += 1;
                        report.imported_ids.push(property.id);
                    }
                    Err(e) => {
                        warn!(external_id = %remote.id, error = %e, "skipping unmappable remote listing");
                        report.invalid += 1;
                    }
                }
            }

            if report.limit_reached || !listings.has_more() || listings.items.is_empty() {
                break;
            }
            page += 1;
        }

        info!(
            fetched = report.fetched,
            imported = report.imported,
            already_linked = report.already_linked,
            invalid = report.invalid,
            "marketplace import finished"
        );
        Ok(report)
    }
}
