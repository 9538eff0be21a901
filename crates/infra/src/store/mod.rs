//! Persistence ports and their implementations.
//!
//! Every tenant-scoped method takes the caller's `TenantId`; rows belonging to
//! another tenant are invisible (reads return `None`, writes `NotFound`).
//! The few cross-tenant scans (`list_due`, `list_stale`, `list_expiring`) exist
//! for the background tasks only and return rows carrying their tenant id.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use imobcrm_auth::User;
use imobcrm_core::{PartnershipId, PropertyId, RefreshJobId, ScheduleId, TenantId, UserId};
use imobcrm_listings::{ListingStatus, Property, SyncStatus};
use imobcrm_scheduling::{RefreshHistory, RefreshJob, RefreshSchedule};
use imobcrm_tenancy::{Partnership, Subscription, Tenant};

pub mod memory;
pub mod postgres;
pub mod tenant_map;

pub use memory::{
    InMemoryCredentialRepository, InMemoryPartnershipRepository, InMemoryPropertyRepository,
    InMemoryRefreshLogRepository, InMemoryScheduleRepository, InMemorySubscriptionRepository,
    InMemoryTenantRepository, InMemoryUserRepository,
};
pub use tenant_map::TenantMap;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    #[error("conflict while {operation}: {message}")]
    Conflict { operation: &'static str, message: String },

    #[error("backend error while {operation}: {message}")]
    Backend { operation: &'static str, message: String },
}

impl StoreError {
    pub fn not_found(entity: &'static str) -> Self {
        StoreError::NotFound { entity }
    }

    pub fn conflict(operation: &'static str, message: impl Into<String>) -> Self {
        StoreError::Conflict {
            operation,
            message: message.into(),
        }
    }

    pub fn backend(operation: &'static str, message: impl Into<String>) -> Self {
        StoreError::Backend {
            operation,
            message: message.into(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Listing query for `PropertyRepository::list`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyFilter {
    pub status: Option<ListingStatus>,
    pub sync_status: Option<SyncStatus>,
    /// Only listings that exist on the marketplace.
    #[serde(default)]
    pub published_only: bool,
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: u32,
}

impl PropertyFilter {
    pub fn published() -> Self {
        Self {
            published_only: true,
            ..Default::default()
        }
    }

    pub fn matches(&self, p: &Property) -> bool {
        self.status.is_none_or(|s| p.status == s)
            && self.sync_status.is_none_or(|s| p.sync_status == s)
            && (!self.published_only || p.is_published())
    }
}

#[async_trait]
pub trait PropertyRepository: Send + Sync {
    async fn insert(&self, property: &Property) -> StoreResult<()>;
    async fn update(&self, property: &Property) -> StoreResult<()>;
    /// Write only the marketplace bookkeeping of `property` (see
    /// [`Property::adopt_sync_state`]); content columns are left untouched.
    async fn update_sync(&self, property: &Property) -> StoreResult<()>;
    async fn get(&self, tenant_id: TenantId, id: PropertyId) -> StoreResult<Option<Property>>;
    /// Ordered by creation time, newest first.
    async fn list(&self, tenant_id: TenantId, filter: &PropertyFilter) -> StoreResult<Vec<Property>>;
    /// Missing ids are silently dropped.
    async fn list_by_ids(&self, tenant_id: TenantId, ids: &[PropertyId]) -> StoreResult<Vec<Property>>;
    async fn find_by_external_id(&self, tenant_id: TenantId, external_id: &str) -> StoreResult<Option<Property>>;
    async fn delete(&self, tenant_id: TenantId, id: PropertyId) -> StoreResult<bool>;
    async fn count(&self, tenant_id: TenantId) -> StoreResult<u64>;
}

#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn insert(&self, schedule: &RefreshSchedule) -> StoreResult<()>;
    /// Write the schedule's configuration: name, slot, offset, frequency,
    /// target, `is_active` and `next_run`.
    ///
    /// Run state and counters are owned by `try_claim`, `finish_run` and
    /// `recover_stale` and are never written here.
    async fn update(&self, schedule: &RefreshSchedule) -> StoreResult<()>;
    async fn get(&self, tenant_id: TenantId, id: ScheduleId) -> StoreResult<Option<RefreshSchedule>>;
    async fn list(&self, tenant_id: TenantId) -> StoreResult<Vec<RefreshSchedule>>;
    async fn delete(&self, tenant_id: TenantId, id: ScheduleId) -> StoreResult<bool>;
    async fn count(&self, tenant_id: TenantId) -> StoreResult<u64>;

    /// Active, idle schedules with `next_run <= now`, oldest first.
    async fn list_due(&self, now: DateTime<Utc>, limit: u32) -> StoreResult<Vec<RefreshSchedule>>;

    /// Schedules marked running since before `running_before`.
    async fn list_stale(&self, running_before: DateTime<Utc>) -> StoreResult<Vec<RefreshSchedule>>;

    /// Atomically mark a schedule as running.
    ///
    /// Succeeds only if the schedule is active, idle and, when `due_only` is
    /// set, due at `now`. Returns the claimed schedule, `None` when another
    /// caller won or the schedule is not eligible.
    async fn try_claim(
        &self,
        tenant_id: TenantId,
        id: ScheduleId,
        now: DateTime<Utc>,
        due_only: bool,
    ) -> StoreResult<Option<RefreshSchedule>>;

    /// Atomically end the run in progress (see [`RefreshSchedule::finish_run`]).
    ///
    /// `None` when the schedule is gone or not running.
    async fn finish_run(
        &self,
        tenant_id: TenantId,
        id: ScheduleId,
        now: DateTime<Utc>,
        success: bool,
    ) -> StoreResult<Option<RefreshSchedule>>;

    /// Atomically release a run older than `stale_after` as failed (see
    /// [`RefreshSchedule::recover_if_stale`]). `None` when nothing changed.
    async fn recover_stale(
        &self,
        tenant_id: TenantId,
        id: ScheduleId,
        now: DateTime<Utc>,
        stale_after: chrono::Duration,
    ) -> StoreResult<Option<RefreshSchedule>>;
}

/// Filter for refresh history reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub schedule_id: Option<ScheduleId>,
    pub job_id: Option<RefreshJobId>,
    pub property_id: Option<PropertyId>,
    pub limit: Option<u32>,
}

impl HistoryQuery {
    pub fn matches(&self, row: &RefreshHistory) -> bool {
        self.schedule_id.is_none_or(|s| row.schedule_id == Some(s))
            && self.job_id.is_none_or(|j| row.job_id == Some(j))
            && self.property_id.is_none_or(|p| row.property_id == p)
    }
}

/// Jobs and per-property history.
#[async_trait]
pub trait RefreshLogRepository: Send + Sync {
    async fn insert_job(&self, job: &RefreshJob) -> StoreResult<()>;
    async fn update_job(&self, job: &RefreshJob) -> StoreResult<()>;
    async fn get_job(&self, tenant_id: TenantId, id: RefreshJobId) -> StoreResult<Option<RefreshJob>>;
    /// Newest first.
    async fn list_jobs(
        &self,
        tenant_id: TenantId,
        schedule_id: Option<ScheduleId>,
        limit: u32,
    ) -> StoreResult<Vec<RefreshJob>>;
    async fn append_history(&self, row: &RefreshHistory) -> StoreResult<()>;
    /// Newest first.
    async fn list_history(&self, tenant_id: TenantId, query: &HistoryQuery) -> StoreResult<Vec<RefreshHistory>>;
}

/// A credential row as persisted: secrets are already encrypted.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCredential {
    pub tenant_id: TenantId,
    pub provider: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Insert or replace the row for `(tenant_id, provider)`.
    async fn upsert(&self, row: &StoredCredential) -> StoreResult<()>;
    async fn get(&self, tenant_id: TenantId, provider: &str) -> StoreResult<Option<StoredCredential>>;
    async fn delete(&self, tenant_id: TenantId, provider: &str) -> StoreResult<bool>;
    /// Rows of `provider` expiring before `before`, soonest first.
    ///
    /// Rows whose `metadata.renewal_failures` reached `max_failures` are left out.
    async fn list_expiring(
        &self,
        provider: &str,
        before: DateTime<Utc>,
        max_failures: u32,
        limit: u32,
    ) -> StoreResult<Vec<StoredCredential>>;
}

#[async_trait]
pub trait TenantRepository: Send + Sync {
    /// `Conflict` when the slug is taken.
    async fn insert(&self, tenant: &Tenant) -> StoreResult<()>;
    async fn update(&self, tenant: &Tenant) -> StoreResult<()>;
    async fn get(&self, id: TenantId) -> StoreResult<Option<Tenant>>;
    async fn find_by_slug(&self, slug: &str) -> StoreResult<Option<Tenant>>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// `Conflict` when the email is already registered (in any tenant).
    async fn insert(&self, user: &User) -> StoreResult<()>;
    async fn update(&self, user: &User) -> StoreResult<()>;
    async fn get(&self, tenant_id: TenantId, id: UserId) -> StoreResult<Option<User>>;
    /// Global lookup used by login, before a tenant is known.
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn list(&self, tenant_id: TenantId) -> StoreResult<Vec<User>>;
    async fn delete(&self, tenant_id: TenantId, id: UserId) -> StoreResult<bool>;
    async fn count(&self, tenant_id: TenantId) -> StoreResult<u64>;
}

/// One subscription per tenant.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn upsert(&self, subscription: &Subscription) -> StoreResult<()>;
    async fn get(&self, tenant_id: TenantId) -> StoreResult<Option<Subscription>>;
}

/// Partnerships are visible to both involved tenants.
#[async_trait]
pub trait PartnershipRepository: Send + Sync {
    async fn insert(&self, partnership: &Partnership) -> StoreResult<()>;
    async fn update(&self, partnership: &Partnership) -> StoreResult<()>;
    async fn get(&self, tenant_id: TenantId, id: PartnershipId) -> StoreResult<Option<Partnership>>;
    async fn list_for(&self, tenant_id: TenantId) -> StoreResult<Vec<Partnership>>;
    /// A pending or accepted partnership between the two tenants, either direction.
    async fn find_open_between(&self, a: TenantId, b: TenantId) -> StoreResult<Option<Partnership>>;
}

/// The full set of repositories the services need.
#[derive(Clone)]
pub struct Stores {
    pub properties: Arc<dyn PropertyRepository>,
    pub schedules: Arc<dyn ScheduleRepository>,
    pub refresh_log: Arc<dyn RefreshLogRepository>,
    pub credentials: Arc<dyn CredentialRepository>,
    pub tenants: Arc<dyn TenantRepository>,
    pub users: Arc<dyn UserRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub partnerships: Arc<dyn PartnershipRepository>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            properties: Arc::new(InMemoryPropertyRepository::new()),
            schedules: Arc::new(InMemoryScheduleRepository::new()),
            refresh_log: Arc::new(InMemoryRefreshLogRepository::new()),
            credentials: Arc::new(InMemoryCredentialRepository::new()),
            tenants: Arc::new(InMemoryTenantRepository::new()),
            users: Arc::new(InMemoryUserRepository::new()),
            subscriptions: Arc::new(InMemorySubscriptionRepository::new()),
            partnerships: Arc::new(InMemoryPartnershipRepository::new()),
        }
    }

    pub fn postgres(pool: Arc<sqlx::PgPool>) -> Self {
        Self {
            properties: Arc::new(postgres::PostgresPropertyRepository::new(pool.clone())),
            schedules: Arc::new(postgres::PostgresScheduleRepository::new(pool.clone())),
            refresh_log: Arc::new(postgres::PostgresRefreshLogRepository::new(pool.clone())),
            credentials: Arc::new(postgres::PostgresCredentialRepository::new(pool.clone())),
            tenants: Arc::new(postgres::PostgresTenantRepository::new(pool.clone())),
            users: Arc::new(postgres::PostgresUserRepository::new(pool.clone())),
            subscriptions: Arc::new(postgres::PostgresSubscriptionRepository::new(pool.clone())),
            partnerships: Arc::new(postgres::PostgresPartnershipRepository::new(pool)),
        }
    }
}
