//! In-process marketplace fake for tests and local development.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::{ApiAuth, CanalProError, ListingInput, ListingPage, MarketplaceApi, RemoteListing, Session};

#[derive(Debug)]
struct StoredListing {
    owner: String,
    listing: RemoteListing,
}

#[derive(Debug, Default)]
struct State {
    /// email -> password
    accounts: HashMap<String, String>,
    /// access token -> (email, expires_at)
    sessions: HashMap<String, (String, DateTime<Utc>)>,
    /// refresh token -> email
    refresh_tokens: HashMap<String, String>,
    listings: BTreeMap<String, StoredListing>,
    failures: VecDeque<CanalProError>,
    calls: HashMap<&'static str, u32>,
    seq: u64,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.seq += 1;
        format!("{prefix}-{}", self.seq)
    }

    fn issue_session(&mut self, email: &str, ttl: Duration) -> Session {
        let access = self.next_id("access");
        let refresh = self.next_id("refresh");
        let expires_at = Utc::now() + ttl;
        self.sessions.insert(access.clone(), (email.to_string(), expires_at));
        self.refresh_tokens.insert(refresh.clone(), email.to_string());
        Session {
            access_token: access,
            refresh_token: Some(refresh),
            expires_at,
        }
    }

    fn owner_of(&self, auth: &ApiAuth) -> Result<String, CanalProError> {
        match self.sessions.get(&auth.access_token) {
            Some((email, expires_at)) if *expires_at > Utc::now() => Ok(email.clone()),
            Some(_) => Err(CanalProError::Unauthorized("token expired".into())),
            None => Err(CanalProError::Unauthorized("unknown token".into())),
        }
    }
}

/// A fake marketplace keeping accounts, sessions and listings in memory.
///
/// Failures queued with `fail_next` are returned (in order) by the next calls,
/// regardless of operation.
#[derive(Debug)]
pub struct InMemoryMarketplace {
    state: Mutex<State>,
    session_ttl: Duration,
}

impl Default for InMemoryMarketplace {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMarketplace {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            session_ttl: Duration::hours(1),
        }
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a marketplace account.
    pub fn with_account(self, email: &str, password: &str) -> Self {
        self.state().accounts.insert(email.to_string(), password.to_string());
        self
    }

    pub fn add_account(&self, email: &str, password: &str) {
        self.state().accounts.insert(email.to_string(), password.to_string());
    }

    /// Queue an error for the next call.
    pub fn fail_next(&self, error: CanalProError) {
        self.state().failures.push_back(error);
    }

    /// Invalidate every refresh token (forces a fallback to password login).
    pub fn revoke_refresh_tokens(&self) {
        self.state().refresh_tokens.clear();
    }

    /// Invalidate every access token.
    pub fn expire_sessions(&self) {
        self.state().sessions.clear();
    }

    /// Number of calls made to `operation` (e.g. `"login"`).
    pub fn calls(&self, operation: &str) -> u32 {
        self.state().calls.get(operation).copied().unwrap_or(0)
    }

    pub fn listing(&self, id: &str) -> Option<RemoteListing> {
        self.state().listings.get(id).map(|s| s.listing.clone())
    }

    pub fn listing_count(&self) -> usize {
        self.state().listings.len()
    }

    /// Seed a listing owned by `email` (for import tests).
    pub fn seed_listing(&self, email: &str, input: ListingInput) -> String {
        let mut st = self.state();
        let id = st.next_id("listing");
        st.listings.insert(
            id.clone(),
            StoredListing {
                owner: email.to_string(),
                listing: RemoteListing {
                    id: id.clone(),
                    status: Some("ACTIVE".into()),
                    updated_at: Some(Utc::now()),
                    listing: input,
                },
            },
        );
        id
    }

    fn begin(&self, operation: &'static str) -> Result<MutexGuard<'_, State>, CanalProError> {
        let mut st = self.state();
        *st.calls.entry(operation).or_default() += 1;
        match st.failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(st),
        }
    }
}

#[async_trait]
impl MarketplaceApi for InMemoryMarketplace {
    async fn login(&self, email: &str, password: &str, _device_id: &str) -> Result<Session, CanalProError> {
        let mut st = self.begin("login")?;
        match st.accounts.get(email) {
            Some(p) if p == password => Ok(st.issue_session(email, self.session_ttl)),
            _ => Err(CanalProError::Unauthorized("invalid email or password".into())),
        }
    }

    async fn refresh_session(&self, refresh_token: &str, _device_id: &str) -> Result<Session, CanalProError> {
        let mut st = self.begin("refresh_token")?;
        let email = st
            .refresh_tokens
            .remove(refresh_token)
            .ok_or_else(|| CanalProError::Unauthorized("invalid refresh token".into()))?;
        Ok(st.issue_session(&email, self.session_ttl))
    }

    async fn create_listing(&self, auth: &ApiAuth, input: &ListingInput) -> Result<String, CanalProError> {
        let mut st = self.begin("create_listing")?;
        let owner = st.owner_of(auth)?;
        let id = st.next_id("listing");
        st.listings.insert(
            id.clone(),
            StoredListing {
                owner,
                listing: RemoteListing {
                    id: id.clone(),
                    status: Some("ACTIVE".into()),
                    updated_at: Some(Utc::now()),
                    listing: input.clone(),
                },
            },
        );
        Ok(id)
    }

    async fn update_listing(
        &self,
        auth: &ApiAuth,
        external_id: &str,
        input: &ListingInput,
    ) -> Result<(), CanalProError> {
        let mut st = self.begin("update_listing")?;
        let owner = st.owner_of(auth)?;
        match st.listings.get_mut(external_id) {
            Some(stored) if stored.owner == owner => {
                stored.listing.listing = input.clone();
                stored.listing.updated_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(CanalProError::NotFound(external_id.to_string())),
        }
    }

    async fn delete_listing(&self, auth: &ApiAuth, external_id: &str) -> Result<(), CanalProError> {
        let mut st = self.begin("delete_listing")?;
        let owner = st.owner_of(auth)?;
        let owned = st.listings.get(external_id).is_some_and(|s| s.owner == owner);
        if !owned {
            return Err(CanalProError::NotFound(external_id.to_string()));
        }
        st.listings.remove(external_id);
        Ok(())
    }

    async fn get_listing(&self, auth: &ApiAuth, external_id: &str) -> Result<RemoteListing, CanalProError> {
        let st = self.begin("get_listing")?;
        let owner = st.owner_of(auth)?;
        match st.listings.get(external_id) {
            Some(stored) if stored.owner == owner => Ok(stored.listing.clone()),
            _ => Err(CanalProError::NotFound(external_id.to_string())),
        }
    }

    async fn list_listings(&self, auth: &ApiAuth, page: u32, page_size: u32) -> Result<ListingPage, CanalProError> {
        let st = self.begin("list_listings")?;
        let owner = st.owner_of(auth)?;
        let owned: Vec<&RemoteListing> = st
            .listings
            .values()
            .filter(|s| s.owner == owner)
            .map(|s| &s.listing)
            .collect();
        let page = page.max(1);
        let page_size = page_size.max(1);
        let items = owned
            .iter()
            .skip(((page - 1) * page_size) as usize)
            .take(page_size as usize)
            .map(|l| (*l).clone())
            .collect();
        Ok(ListingPage {
            items,
            page,
            page_size,
            total_count: owned.len() as u32,
        })
    }

    async fn republish_listing(&self, auth: &ApiAuth, external_id: &str) -> Result<DateTime<Utc>, CanalProError> {
        let mut st = self.begin("republish_listing")?;
        let owner = st.owner_of(auth)?;
        match st.listings.get_mut(external_id) {
            Some(stored) if stored.owner == owner => {
                let now = Utc::now();
                stored.listing.updated_at = Some(now);
                Ok(now)
            }
            _ => Err(CanalProError::NotFound(external_id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AddressInput;

    fn input(title: &str) -> ListingInput {
        ListingInput {
            external_code: None,
            title: title.into(),
            description: String::new(),
            business_type: "SALE".into(),
            unit_type: "APARTMENT".into(),
            usage_type: "RESIDENTIAL".into(),
            publication_type: "STANDARD".into(),
            address: AddressInput {
                city: "Recife".into(),
                state: "PE".into(),
                zip_code: "50000000".into(),
                visibility: "FULL".into(),
                ..Default::default()
            },
            pricing_infos: vec![],
            bedrooms: None,
            suites: None,
            bathrooms: None,
            parking_spaces: None,
            usable_areas: None,
            total_areas: None,
            floor: None,
            amenities: vec![],
            images: vec![],
            floor_plans: vec![],
            video_urls: vec![],
        }
    }

    #[tokio::test]
    async fn login_refresh_and_publish() {
        let m = InMemoryMarketplace::new().with_account("a@b.c", "pw");
        assert!(m.login("a@b.c", "nope", "dev").await.unwrap_err().is_unauthorized());

        let s = m.login("a@b.c", "pw", "dev").await.unwrap();
        let refreshed = m
            .refresh_session(s.refresh_token.as_deref().unwrap(), "dev")
            .await
            .unwrap();
        // Refresh tokens are single use.
        assert!(m.refresh_session(s.refresh_token.as_deref().unwrap(), "dev").await.is_err());

        let auth = ApiAuth::new(refreshed.access_token, "dev");
        let id = m.create_listing(&auth, &input("one")).await.unwrap();
        assert_eq!(m.get_listing(&auth, &id).await.unwrap().listing.title, "one");

        m.expire_sessions();
        assert!(m.republish_listing(&auth, &id).await.unwrap_err().is_unauthorized());
    }

    #[tokio::test]
    async fn queued_failures_come_first() {
        let m = InMemoryMarketplace::new().with_account("a@b.c", "pw");
        m.fail_next(CanalProError::RateLimited);
        assert_eq!(m.login("a@b.c", "pw", "dev").await, Err(CanalProError::RateLimited));
        assert!(m.login("a@b.c", "pw", "dev").await.is_ok());
        assert_eq!(m.calls("login"), 2);
    }

    #[tokio::test]
    async fn listings_are_paginated_per_owner() {
        let m = InMemoryMarketplace::new().with_account("a@b.c", "pw");
        for i in 0..5 {
            m.seed_listing("a@b.c", input(&format!("l{i}")));
        }
        m.seed_listing("other@b.c", input("x"));

        let s = m.login("a@b.c", "pw", "dev").await.unwrap();
        let auth = ApiAuth::new(s.access_token, "dev");
        let p1 = m.list_listings(&auth, 1, 2).await.unwrap();
        assert_eq!(p1.items.len(), 2);
        assert_eq!(p1.total_count, 5);
        assert!(p1.has_more());
        let p3 = m.list_listings(&auth, 3, 2).await.unwrap();
        assert_eq!(p3.items.len(), 1);
        assert!(!p3.has_more());
    }
}
