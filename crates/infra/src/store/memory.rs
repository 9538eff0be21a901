//! In-memory repositories for tests and local development.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use imobcrm_auth::User;
use imobcrm_core::{PartnershipId, PropertyId, RefreshJobId, ScheduleId, TenantId, UserId};
use imobcrm_listings::Property;
use imobcrm_scheduling::{RefreshHistory, RefreshJob, RefreshSchedule};
use imobcrm_tenancy::{Partnership, PartnershipStatus, Subscription, Tenant};

use super::{
    CredentialRepository, HistoryQuery, PartnershipRepository, PropertyFilter, PropertyRepository,
    RefreshLogRepository, ScheduleRepository, StoreError, StoreResult, StoredCredential,
    SubscriptionRepository, TenantMap, TenantRepository, UserRepository,
};

fn paginate<T>(items: Vec<T>, offset: u32, limit: Option<u32>) -> Vec<T> {
    let iter = items.into_iter().skip(offset as usize);
    match limit {
        Some(l) => iter.take(l as usize).collect(),
        None => iter.collect(),
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPropertyRepository {
    rows: TenantMap<PropertyId, Property>,
}

impl InMemoryPropertyRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PropertyRepository for InMemoryPropertyRepository {
    async fn insert(&self, property: &Property) -> StoreResult<()> {
        let mut map = self.rows.write();
        let key = (property.tenant_id, property.id);
        if map.contains_key(&key) {
            return Err(StoreError::conflict("inserting property", "id already exists"));
        }
        if let Some(ext) = &property.external_id {
            let taken = map
                .iter()
                .any(|((t, _), p)| *t == property.tenant_id && p.external_id.as_ref() == Some(ext));
            if taken {
                return Err(StoreError::conflict("inserting property", format!("external id {ext} already linked")));
            }
        }
        map.insert(key, property.clone());
        Ok(())
    }

    async fn update(&self, property: &Property) -> StoreResult<()> {
        if self.rows.replace(property.tenant_id, property.id, property.clone()) {
            Ok(())
        } else {
            Err(StoreError::not_found("property"))
        }
    }

    async fn update_sync(&self, property: &Property) -> StoreResult<()> {
        self.rows
            .modify(property.tenant_id, &property.id, |row| row.adopt_sync_state(property))
            .ok_or_else(|| StoreError::not_found("property"))
    }

    async fn get(&self, tenant_id: TenantId, id: PropertyId) -> StoreResult<Option<Property>> {
        Ok(self.rows.get(tenant_id, &id))
    }

    async fn list(&self, tenant_id: TenantId, filter: &PropertyFilter) -> StoreResult<Vec<Property>> {
        let mut rows: Vec<Property> = self.rows.list(tenant_id).into_iter().filter(|p| filter.matches(p)).collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(paginate(rows, filter.offset, filter.limit))
    }

    async fn list_by_ids(&self, tenant_id: TenantId, ids: &[PropertyId]) -> StoreResult<Vec<Property>> {
        Ok(ids.iter().filter_map(|id| self.rows.get(tenant_id, id)).collect())
    }

    async fn find_by_external_id(&self, tenant_id: TenantId, external_id: &str) -> StoreResult<Option<Property>> {
        Ok(self
            .rows
            .list(tenant_id)
            .into_iter()
            .find(|p| p.external_id.as_deref() == Some(external_id)))
    }

    async fn delete(&self, tenant_id: TenantId, id: PropertyId) -> StoreResult<bool> {
        Ok(self.rows.remove(tenant_id, &id).is_some())
    }

    async fn count(&self, tenant_id: TenantId) -> StoreResult<u64> {
        Ok(self.rows.count(tenant_id))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryScheduleRepository {
    rows: TenantMap<ScheduleId, RefreshSchedule>,
}

impl InMemoryScheduleRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleRepository for InMemoryScheduleRepository {
    async fn insert(&self, schedule: &RefreshSchedule) -> StoreResult<()> {
        if self.rows.contains(schedule.tenant_id, &schedule.id) {
            return Err(StoreError::conflict("inserting schedule", "id already exists"));
        }
        self.rows.upsert(schedule.tenant_id, schedule.id, schedule.clone());
        Ok(())
    }

    async fn update(&self, schedule: &RefreshSchedule) -> StoreResult<()> {
        self.rows
            .modify(schedule.tenant_id, &schedule.id, |row| {
                row.name = schedule.name.clone();
                row.time_slot = schedule.time_slot;
                row.utc_offset_minutes = schedule.utc_offset_minutes;
                row.frequency = schedule.frequency.clone();
                row.target = schedule.target.clone();
                row.is_active = schedule.is_active;
                row.next_run = schedule.next_run;
                row.updated_at = schedule.updated_at;
            })
            .ok_or_else(|| StoreError::not_found("schedule"))
    }

    async fn get(&self, tenant_id: TenantId, id: ScheduleId) -> StoreResult<Option<RefreshSchedule>> {
        Ok(self.rows.get(tenant_id, &id))
    }

    async fn list(&self, tenant_id: TenantId) -> StoreResult<Vec<RefreshSchedule>> {
        let mut rows = self.rows.list(tenant_id);
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn delete(&self, tenant_id: TenantId, id: ScheduleId) -> StoreResult<bool> {
        Ok(self.rows.remove(tenant_id, &id).is_some())
    }

    async fn count(&self, tenant_id: TenantId) -> StoreResult<u64> {
        Ok(self.rows.count(tenant_id))
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: u32) -> StoreResult<Vec<RefreshSchedule>> {
        let mut due = self.rows.scan(|s| s.is_due(now));
        due.sort_by_key(|s| (s.next_run, s.id));
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn list_stale(&self, running_before: DateTime<Utc>) -> StoreResult<Vec<RefreshSchedule>> {
        Ok(self
            .rows
            .scan(|s| s.is_running && s.running_since.is_some_and(|t| t <= running_before)))
    }

    async fn try_claim(
        &self,
        tenant_id: TenantId,
        id: ScheduleId,
        now: DateTime<Utc>,
        due_only: bool,
    ) -> StoreResult<Option<RefreshSchedule>> {
        let mut map = self.rows.write();
        let Some(schedule) = map.get_mut(&(tenant_id, id)) else {
            return Ok(None);
        };
        if due_only && !schedule.is_due(now) {
            return Ok(None);
        }
        match schedule.begin_run(now) {
            Ok(()) => Ok(Some(schedule.clone())),
            Err(_) => Ok(None),
        }
    }

    async fn finish_run(
        &self,
        tenant_id: TenantId,
        id: ScheduleId,
        now: DateTime<Utc>,
        success: bool,
    ) -> StoreResult<Option<RefreshSchedule>> {
        let finished = self.rows.modify(tenant_id, &id, |s| {
            if !s.is_running {
                return None;
            }
            s.finish_run(now, success);
            Some(s.clone())
        });
        Ok(finished.flatten())
    }

    async fn recover_stale(
        &self,
        tenant_id: TenantId,
        id: ScheduleId,
        now: DateTime<Utc>,
        stale_after: chrono::Duration,
    ) -> StoreResult<Option<RefreshSchedule>> {
        let recovered = self.rows.modify(tenant_id, &id, |s| {
            if !s.recover_if_stale(now, stale_after) {
                return None;
            }
            Some(s.clone())
        });
        Ok(recovered.flatten())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRefreshLogRepository {
    jobs: TenantMap<RefreshJobId, RefreshJob>,
    history: RwLock<Vec<RefreshHistory>>,
}

impl InMemoryRefreshLogRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RefreshLogRepository for InMemoryRefreshLogRepository {
    async fn insert_job(&self, job: &RefreshJob) -> StoreResult<()> {
        if self.jobs.contains(job.tenant_id, &job.id) {
            return Err(StoreError::conflict("inserting refresh job", "id already exists"));
        }
        self.jobs.upsert(job.tenant_id, job.id, job.clone());
        Ok(())
    }

    async fn update_job(&self, job: &RefreshJob) -> StoreResult<()> {
        if self.jobs.replace(job.tenant_id, job.id, job.clone()) {
            Ok(())
        } else {
            Err(StoreError::not_found("refresh job"))
        }
    }

    async fn get_job(&self, tenant_id: TenantId, id: RefreshJobId) -> StoreResult<Option<RefreshJob>> {
        Ok(self.jobs.get(tenant_id, &id))
    }

    async fn list_jobs(
        &self,
        tenant_id: TenantId,
        schedule_id: Option<ScheduleId>,
        limit: u32,
    ) -> StoreResult<Vec<RefreshJob>> {
        let mut rows: Vec<RefreshJob> = self
            .jobs
            .list(tenant_id)
            .into_iter()
            .filter(|j| schedule_id.is_none_or(|s| j.schedule_id == Some(s)))
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn append_history(&self, row: &RefreshHistory) -> StoreResult<()> {
        self.history
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(row.clone());
        Ok(())
    }

    async fn list_history(&self, tenant_id: TenantId, query: &HistoryQuery) -> StoreResult<Vec<RefreshHistory>> {
        let history = self.history.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let rows = history
            .iter()
            .rev()
            .filter(|r| r.tenant_id == tenant_id && query.matches(r))
            .cloned()
            .collect();
        Ok(paginate(rows, 0, query.limit))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCredentialRepository {
    rows: TenantMap<String, StoredCredential>,
}

impl InMemoryCredentialRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialRepository for InMemoryCredentialRepository {
    async fn upsert(&self, row: &StoredCredential) -> StoreResult<()> {
        let mut row = row.clone();
        if let Some(existing) = self.rows.get(row.tenant_id, &row.provider) {
            row.created_at = existing.created_at;
        }
        self.rows.upsert(row.tenant_id, row.provider.clone(), row);
        Ok(())
    }

    async fn get(&self, tenant_id: TenantId, provider: &str) -> StoreResult<Option<StoredCredential>> {
        Ok(self.rows.get(tenant_id, &provider.to_string()))
    }

    async fn delete(&self, tenant_id: TenantId, provider: &str) -> StoreResult<bool> {
        Ok(self.rows.remove(tenant_id, &provider.to_string()).is_some())
    }

    async fn list_expiring(
        &self,
        provider: &str,
        before: DateTime<Utc>,
        max_failures: u32,
        limit: u32,
    ) -> StoreResult<Vec<StoredCredential>> {
        let mut rows = self.rows.scan(|c| {
            c.provider == provider && c.expires_at <= before && renewal_failures(c) < u64::from(max_failures)
        });
        rows.sort_by_key(|c| c.expires_at);
        rows.truncate(limit as usize);
        Ok(rows)
    }
}

fn renewal_failures(row: &StoredCredential) -> u64 {
    row.metadata
        .get("renewal_failures")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0)
}

#[derive(Debug, Default)]
pub struct InMemoryTenantRepository {
    rows: RwLock<HashMap<TenantId, Tenant>>,
}

impl InMemoryTenantRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantRepository for InMemoryTenantRepository {
    async fn insert(&self, tenant: &Tenant) -> StoreResult<()> {
        let mut map = self.rows.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if map.values().any(|t| t.slug == tenant.slug) {
            return Err(StoreError::conflict("inserting tenant", format!("slug {} is taken", tenant.slug)));
        }
        map.insert(tenant.id, tenant.clone());
        Ok(())
    }

    async fn update(&self, tenant: &Tenant) -> StoreResult<()> {
        let mut map = self.rows.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        match map.get_mut(&tenant.id) {
            Some(slot) => {
                *slot = tenant.clone();
                Ok(())
            }
            None => Err(StoreError::not_found("tenant")),
        }
    }

    async fn get(&self, id: TenantId) -> StoreResult<Option<Tenant>> {
        let map = self.rows.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(map.get(&id).cloned())
    }

    async fn find_by_slug(&self, slug: &str) -> StoreResult<Option<Tenant>> {
        let map = self.rows.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(map.values().find(|t| t.slug == slug).cloned())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryUserRepository {
    rows: TenantMap<UserId, User>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn insert(&self, user: &User) -> StoreResult<()> {
        let mut map = self.rows.write();
        if map.values().any(|u| u.email == user.email) {
            return Err(StoreError::conflict("inserting user", "email already registered"));
        }
        map.insert((user.tenant_id, user.id), user.clone());
        Ok(())
    }

    async fn update(&self, user: &User) -> StoreResult<()> {
        let mut map = self.rows.write();
        if map
            .iter()
            .any(|((_, id), u)| *id != user.id && u.email == user.email)
        {
            return Err(StoreError::conflict("updating user", "email already registered"));
        }
        match map.get_mut(&(user.tenant_id, user.id)) {
            Some(slot) => {
                *slot = user.clone();
                Ok(())
            }
            None => Err(StoreError::not_found("user")),
        }
    }

    async fn get(&self, tenant_id: TenantId, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.rows.get(tenant_id, &id))
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self.rows.scan(|u| u.email == email).into_iter().next())
    }

    async fn list(&self, tenant_id: TenantId) -> StoreResult<Vec<User>> {
        let mut rows = self.rows.list(tenant_id);
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn delete(&self, tenant_id: TenantId, id: UserId) -> StoreResult<bool> {
        Ok(self.rows.remove(tenant_id, &id).is_some())
    }

    async fn count(&self, tenant_id: TenantId) -> StoreResult<u64> {
        Ok(self.rows.count(tenant_id))
    }
}

#[derive(Debug, Default)]
pub struct InMemorySubscriptionRepository {
    rows: RwLock<HashMap<TenantId, Subscription>>,
}

impl InMemorySubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn upsert(&self, subscription: &Subscription) -> StoreResult<()> {
        self.rows
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(subscription.tenant_id, subscription.clone());
        Ok(())
    }

    async fn get(&self, tenant_id: TenantId) -> StoreResult<Option<Subscription>> {
        let map = self.rows.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(map.get(&tenant_id).cloned())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPartnershipRepository {
    rows: RwLock<HashMap<PartnershipId, Partnership>>,
}

impl InMemoryPartnershipRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PartnershipRepository for InMemoryPartnershipRepository {
    async fn insert(&self, partnership: &Partnership) -> StoreResult<()> {
        let mut map = self.rows.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if map.contains_key(&partnership.id) {
            return Err(StoreError::conflict("inserting partnership", "id already exists"));
        }
        map.insert(partnership.id, partnership.clone());
        Ok(())
    }

    async fn update(&self, partnership: &Partnership) -> StoreResult<()> {
        let mut map = self.rows.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        match map.get_mut(&partnership.id) {
            Some(slot) => {
                *slot = partnership.clone();
                Ok(())
            }
            None => Err(StoreError::not_found("partnership")),
        }
    }

    async fn get(&self, tenant_id: TenantId, id: PartnershipId) -> StoreResult<Option<Partnership>> {
        let map = self.rows.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(map.get(&id).filter(|p| p.involves(tenant_id)).cloned())
    }

    async fn list_for(&self, tenant_id: TenantId) -> StoreResult<Vec<Partnership>> {
        let map = self.rows.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut rows: Vec<Partnership> = map.values().filter(|p| p.involves(tenant_id)).cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    async fn find_open_between(&self, a: TenantId, b: TenantId) -> StoreResult<Option<Partnership>> {
        let map = self.rows.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(map
            .values()
            .find(|p| {
                p.involves(a)
                    && p.involves(b)
                    && matches!(p.status, PartnershipStatus::Pending | PartnershipStatus::Accepted)
            })
            .cloned())
    }
}
