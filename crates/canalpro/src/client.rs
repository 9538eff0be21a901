//! HTTP client for the Gandalf GraphQL endpoint.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use imobcrm_core::RetryPolicy;

use crate::graphql::{self, GraphQlRequest, GraphQlResponse, IdPayload, RepublishPayload, TokenPayload};
use crate::{ApiAuth, CanalProError, ListingInput, ListingPage, MarketplaceApi, RemoteListing, Session};

/// Connection settings for `GandalfClient`.
#[derive(Debug, Clone)]
pub struct GandalfConfig {
    /// Full GraphQL endpoint URL.
    pub api_url: String,
    /// Sent as `X-Domain`.
    pub domain: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for GandalfConfig {
    fn default() -> Self {
        Self {
            api_url: "https://gandalf-api.grupozap.com/".to_string(),
            domain: "www.canalpro.com.br".to_string(),
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// reqwest-backed marketplace client.
///
/// Transport errors, 429 and 5xx are retried according to `config.retry`.
/// Authentication failures are returned immediately.
#[derive(Debug, Clone)]
pub struct GandalfClient {
    http: reqwest::Client,
    config: GandalfConfig,
}

impl GandalfClient {
    pub fn new(config: GandalfConfig) -> Result<Self, CanalProError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CanalProError::Transport(e.to_string()))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &GandalfConfig {
        &self.config
    }

    async fn send_once(
        &self,
        query: &str,
        variables: &Value,
        field: &str,
        token: Option<&str>,
        device_id: &str,
    ) -> Result<Value, CanalProError> {
        let mut req = self
            .http
            .post(&self.config.api_url)
            .header("X-Domain", &self.config.domain)
            .header("X-DeviceId", device_id)
            .json(&GraphQlRequest {
                query,
                variables: variables.clone(),
            });
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }

        let res = req.send().await?;
        let status = res.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let body = res.text().await.unwrap_or_default();
                return Err(CanalProError::Unauthorized(format!("http {}: {body}", status.as_u16())));
            }
            StatusCode::TOO_MANY_REQUESTS => return Err(CanalProError::RateLimited),
            s if !s.is_success() => {
                let body = res.text().await.unwrap_or_default();
                return Err(CanalProError::Http {
                    status: s.as_u16(),
                    body,
                });
            }
            _ => {}
        }

        let envelope: GraphQlResponse = res.json().await?;
        envelope.into_field(field)
    }

    /// Execute one GraphQL operation with retry/backoff on transient failures.
    async fn execute<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        query: &str,
        variables: Value,
        field: &str,
        token: Option<&str>,
        device_id: &str,
    ) -> Result<T, CanalProError> {
        let mut attempt = 0u32;
        loop {
            match self.send_once(query, &variables, field, token, device_id).await {
                Ok(value) => {
                    debug!(operation, attempt, "marketplace call succeeded");
                    return serde_json::from_value(value).map_err(|e| CanalProError::Decode(e.to_string()));
                }
                Err(e) if e.is_transient() && self.config.retry.should_retry(attempt) => {
                    attempt += 1;
                    let delay = self.config.retry.delay_for_attempt(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient marketplace error; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn session_from(payload: TokenPayload, now: DateTime<Utc>) -> Session {
        Session {
            access_token: payload.access_token,
            refresh_token: payload.refresh_token,
            expires_at: now + chrono::Duration::seconds(payload.expires_in.max(0)),
        }
    }
}

#[async_trait]
impl MarketplaceApi for GandalfClient {
    #[instrument(skip(self, password))]
    async fn login(&self, email: &str, password: &str, device_id: &str) -> Result<Session, CanalProError> {
        let payload: TokenPayload = self
            .execute(
                "login",
                graphql::LOGIN,
                json!({ "email": email, "password": password }),
                "login",
                None,
                device_id,
            )
            .await?;
        Ok(Self::session_from(payload, Utc::now()))
    }

    #[instrument(skip_all)]
    async fn refresh_session(&self, refresh_token: &str, device_id: &str) -> Result<Session, CanalProError> {
        let payload: TokenPayload = self
            .execute(
                "refresh_token",
                graphql::REFRESH_TOKEN,
                json!({ "refreshToken": refresh_token }),
                "refreshToken",
                None,
                device_id,
            )
            .await?;
        let mut session = Self::session_from(payload, Utc::now());
        // Some responses omit the refresh token when it was not rotated.
        if session.refresh_token.is_none() {
            session.refresh_token = Some(refresh_token.to_string());
        }
        Ok(session)
    }

    #[instrument(skip_all)]
    async fn create_listing(&self, auth: &ApiAuth, input: &ListingInput) -> Result<String, CanalProError> {
        let payload: IdPayload = self
            .execute(
                "create_listing",
                graphql::CREATE_LISTING,
                json!({ "input": input }),
                "createListing",
                Some(&auth.access_token),
                &auth.device_id,
            )
            .await?;
        Ok(payload.id)
    }

    #[instrument(skip(self, auth, input))]
    async fn update_listing(
        &self,
        auth: &ApiAuth,
        external_id: &str,
        input: &ListingInput,
    ) -> Result<(), CanalProError> {
        let _: IdPayload = self
            .execute(
                "update_listing",
                graphql::UPDATE_LISTING,
                json!({ "id": external_id, "input": input }),
                "updateListing",
                Some(&auth.access_token),
                &auth.device_id,
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self, auth))]
    async fn delete_listing(&self, auth: &ApiAuth, external_id: &str) -> Result<(), CanalProError> {
        let deleted: bool = self
            .execute(
                "delete_listing",
                graphql::DELETE_LISTING,
                json!({ "id": external_id }),
                "deleteListing",
                Some(&auth.access_token),
                &auth.device_id,
            )
            .await?;
        if !deleted {
            return Err(CanalProError::NotFound(external_id.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self, auth))]
    async fn get_listing(&self, auth: &ApiAuth, external_id: &str) -> Result<RemoteListing, CanalProError> {
        let listing: Option<RemoteListing> = self
            .execute(
                "get_listing",
                &graphql::get_listing(),
                json!({ "id": external_id }),
                "listing",
                Some(&auth.access_token),
                &auth.device_id,
            )
            .await?;
        listing.ok_or_else(|| CanalProError::NotFound(external_id.to_string()))
    }

    #[instrument(skip(self, auth))]
    async fn list_listings(&self, auth: &ApiAuth, page: u32, page_size: u32) -> Result<ListingPage, CanalProError> {
        self.execute(
            "list_listings",
            &graphql::list_listings(),
            json!({ "page": page, "pageSize": page_size }),
            "listings",
            Some(&auth.access_token),
            &auth.device_id,
        )
        .await
    }

    #[instrument(skip(self, auth))]
    async fn republish_listing(&self, auth: &ApiAuth, external_id: &str) -> Result<DateTime<Utc>, CanalProError> {
        let payload: RepublishPayload = self
            .execute(
                "republish_listing",
                graphql::REPUBLISH_LISTING,
                json!({ "id": external_id }),
                "republishListing",
                Some(&auth.access_token),
                &auth.device_id,
            )
            .await?;
        Ok(payload.updated_at)
    }
}
