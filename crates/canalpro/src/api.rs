use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{CanalProError, ListingInput, ListingPage, RemoteListing, Session};

/// Per-call authentication for listing operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiAuth {
    pub access_token: String,
    pub device_id: String,
}

impl ApiAuth {
    pub fn new(access_token: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            device_id: device_id.into(),
        }
    }
}

/// Operations the CRM needs from the marketplace.
#[async_trait]
pub trait MarketplaceApi: Send + Sync {
    /// Password login; returns a fresh session.
    async fn login(&self, email: &str, password: &str, device_id: &str) -> Result<Session, CanalProError>;

    /// Exchange a refresh token for a new session.
    async fn refresh_session(&self, refresh_token: &str, device_id: &str) -> Result<Session, CanalProError>;

    /// Publish a new listing; returns its marketplace id.
    async fn create_listing(&self, auth: &ApiAuth, input: &ListingInput) -> Result<String, CanalProError>;

    async fn update_listing(
        &self,
        auth: &ApiAuth,
        external_id: &str,
        input: &ListingInput,
    ) -> Result<(), CanalProError>;

    async fn delete_listing(&self, auth: &ApiAuth, external_id: &str) -> Result<(), CanalProError>;

    async fn get_listing(&self, auth: &ApiAuth, external_id: &str) -> Result<RemoteListing, CanalProError>;

    /// `page` is 1-based.
    async fn list_listings(&self, auth: &ApiAuth, page: u32, page_size: u32) -> Result<ListingPage, CanalProError>;

    /// Bump a listing to the top of search results; returns the marketplace timestamp.
    async fn republish_listing(&self, auth: &ApiAuth, external_id: &str) -> Result<DateTime<Utc>, CanalProError>;
}
