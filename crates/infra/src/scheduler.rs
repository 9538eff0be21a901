//! Refresh scheduler: turns due schedules into refresh jobs.
//!
//! A beat calls [`RefreshScheduler::tick`]. Each tick releases runs abandoned
//! by a crashed worker, claims the due schedules (a claim is atomic in the
//! store, so concurrent beats never run the same schedule twice), creates one
//! [`RefreshJob`] per claimed schedule and hands it to the worker pool. The
//! job bumps every targeted listing on the marketplace, writes one history
//! row per property and finally releases the schedule.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use imobcrm_core::{DomainError, PropertyId, ScheduleId, TenantId};
use imobcrm_scheduling::{JobTrigger, RefreshHistory, RefreshJob, RefreshSchedule};

use crate::config::RefreshConfig;
use crate::store::{PropertyFilter, PropertyRepository, RefreshLogRepository, ScheduleRepository, StoreError};
use crate::sync::{ListingSync, SyncError};
use crate::worker::{WorkerPool, WorkerStats};

const NOT_PUBLISHED: &str = "property is not published";
const NOT_FOUND: &str = "property no longer exists";

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("schedule not found")]
    ScheduleNotFound,

    #[error("property not found")]
    PropertyNotFound,

    #[error("schedule is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Stale runs released.
    pub recovered: u32,
    pub due: u32,
    pub dispatched: u32,
    /// Claimed by a concurrent beat first.
    pub lost_claims: u32,
    /// Due but the tenant may not sync; recorded as failed runs.
    pub not_entitled: u32,
}

#[derive(Clone)]
pub struct RefreshScheduler {
    schedules: Arc<dyn ScheduleRepository>,
    log: Arc<dyn RefreshLogRepository>,
    properties: Arc<dyn PropertyRepository>,
    sync: Arc<ListingSync>,
    pool: WorkerPool,
    config: RefreshConfig,
}

impl RefreshScheduler {
    pub fn new(
        schedules: Arc<dyn ScheduleRepository>,
        log: Arc<dyn RefreshLogRepository>,
        properties: Arc<dyn PropertyRepository>,
        sync: Arc<ListingSync>,
        config: RefreshConfig,
    ) -> Self {
        Self {
            pool: WorkerPool::new("refresh", config.max_concurrent),
            schedules,
            log,
            properties,
            sync,
            config,
        }
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    pub fn stats(&self) -> WorkerStats {
        self.pool.stats()
    }

    /// Wait for every dispatched job to finish.
    pub async fn wait_idle(&self) {
        self.pool.wait_idle().await;
    }

    #[instrument(skip(self))]
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, SchedulerError> {
        let mut report = TickReport {
            recovered: self.recover_stale(now).await?,
            ..TickReport::default()
        };

        let due = self.schedules.list_due(now, self.config.batch_size).await?;
        report.due = due.len() as u32;

        for schedule in due {
            let Some(claimed) = self
                .schedules
                .try_claim(schedule.tenant_id, schedule.id, now, true)
                .await?
            else {
                debug!(schedule_id = %schedule.id, "schedule claimed elsewhere");
                report.lost_claims += 1;
                continue;
            };

            if let Err(err) = self.sync.ensure_entitled(claimed.tenant_id, now).await {
                warn!(tenant_id = %claimed.tenant_id, schedule_id = %claimed.id, error = %err, "skipping scheduled refresh");
                self.reject_run(claimed, JobTrigger::Scheduled, err.to_string(), now).await?;
                report.not_entitled += 1;
                continue;
            }

            match self.start(claimed, JobTrigger::Scheduled, now).await {
                Ok(_) => report.dispatched += 1,
                Err(err) => warn!(error = %err, "failed to dispatch refresh job"),
            }
        }

        if report.due > 0 || report.recovered > 0 {
            info!(
                due = report.due,
                dispatched = report.dispatched,
                recovered = report.recovered,
                lost_claims = report.lost_claims,
                not_entitled = report.not_entitled,
                "refresh tick finished"
            );
        }
        Ok(report)
    }

    async fn recover_stale(&self, now: DateTime<Utc>) -> Result<u32, SchedulerError> {
        let stale_after = self.config.stale_after;
        let mut recovered = 0;
        for stale in self.schedules.list_stale(now - stale_after).await? {
            let recovered_run = self
                .schedules
                .recover_stale(stale.tenant_id, stale.id, now, stale_after)
                .await?;
            let Some(schedule) = recovered_run else {
                continue;
            };

            let jobs = self.log.list_jobs(schedule.tenant_id, Some(schedule.id), 5).await?;
            for mut job in jobs.into_iter().filter(|j| !j.status.is_terminal()) {
                job.mark_failed("abandoned by worker", now)?;
                self.log.update_job(&job).await?;
            }

            warn!(tenant_id = %schedule.tenant_id, schedule_id = %schedule.id, "released stale schedule run");
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Run a schedule immediately, whether due or not.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, schedule_id = %schedule_id))]
    pub async fn run_now(&self, tenant_id: TenantId, schedule_id: ScheduleId) -> Result<RefreshJob, SchedulerError> {
        let now = Utc::now();
        let schedule = self
            .schedules
            .get(tenant_id, schedule_id)
            .await?
            .ok_or(SchedulerError::ScheduleNotFound)?;
        if !schedule.is_active {
            return Err(DomainError::invariant("schedule is not active").into());
        }
        self.sync.ensure_entitled(tenant_id, now).await?;

        let claimed = self
            .schedules
            .try_claim(tenant_id, schedule_id, now, false)
            .await?
            .ok_or(SchedulerError::AlreadyRunning)?;
        self.start(claimed, JobTrigger::Manual, now).await
    }

    /// Bump a single listing as a one-off job.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, property_id = %property_id))]
    pub async fn refresh_property_now(
        &self,
        tenant_id: TenantId,
        property_id: PropertyId,
    ) -> Result<RefreshJob, SchedulerError> {
        let now = Utc::now();
        let property = self
            .properties
            .get(tenant_id, property_id)
            .await?
            .ok_or(SchedulerError::PropertyNotFound)?;
        if !property.is_published() {
            return Err(SyncError::NotPublished.into());
        }
        self.sync.ensure_entitled(tenant_id, now).await?;

        let job = RefreshJob::new(tenant_id, None, JobTrigger::Manual, 1, now);
        self.log.insert_job(&job).await?;
        self.dispatch(job.clone(), None, vec![property.id]);
        Ok(job)
    }

    /// Resolve the claimed schedule's targets, record the job and dispatch it.
    async fn start(
        &self,
        schedule: RefreshSchedule,
        trigger: JobTrigger,
        now: DateTime<Utc>,
    ) -> Result<RefreshJob, SchedulerError> {
        let targets = match self.targets(&schedule).await {
            Ok(t) => t,
            Err(err) => {
                self.release(schedule.tenant_id, schedule.id, false).await;
                return Err(err);
            }
        };

        let job = RefreshJob::new(schedule.tenant_id, Some(schedule.id), trigger, targets.len() as u32, now);
        if let Err(err) = self.log.insert_job(&job).await {
            self.release(schedule.tenant_id, schedule.id, false).await;
            return Err(err.into());
        }
        debug!(job_id = %job.id, schedule_id = %schedule.id, total = job.total, "refresh job created");
        self.dispatch(job.clone(), Some(schedule.id), targets);
        Ok(job)
    }

    /// Properties the job will visit. Each one is reloaded right before its
    /// refresh, so queued jobs never act on stale copies.
    async fn targets(&self, schedule: &RefreshSchedule) -> Result<Vec<PropertyId>, SchedulerError> {
        match schedule.explicit_properties() {
            Some(ids) => Ok(ids.to_vec()),
            None => Ok(self
                .properties
                .list(schedule.tenant_id, &PropertyFilter::published())
                .await?
                .into_iter()
                .map(|p| p.id)
                .collect()),
        }
    }

    /// Record a claimed run that cannot proceed as a failed job.
    async fn reject_run(
        &self,
        schedule: RefreshSchedule,
        trigger: JobTrigger,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        let mut job = RefreshJob::new(schedule.tenant_id, Some(schedule.id), trigger, 0, now);
        job.mark_failed(reason, now)?;
        self.log.insert_job(&job).await?;
        self.release(schedule.tenant_id, schedule.id, false).await;
        Ok(())
    }

    fn dispatch(&self, job: RefreshJob, schedule_id: Option<ScheduleId>, targets: Vec<PropertyId>) {
        let this = self.clone();
        let label = format!("refresh-job-{}", job.id);
        self.pool.submit(label, async move { this.execute_job(job, schedule_id, targets).await });
    }

    async fn execute_job(
        &self,
        mut job: RefreshJob,
        schedule_id: Option<ScheduleId>,
        targets: Vec<PropertyId>,
    ) -> Result<(), SchedulerError> {
        let result = self.process(&mut job, targets).await;

        let now = Utc::now();
        // The schedule is released below whatever happens to these writes.
        if let Err(err) = &result {
            if !job.status.is_terminal() {
                if let Err(e) = job.mark_failed(err.to_string(), now) {
                    warn!(job_id = %job.id, error = %e, "job already finished");
                }
            }
            if let Err(e) = self.log.update_job(&job).await {
                warn!(job_id = %job.id, error = %e, "failed to record job outcome");
            }
        }
        if let Some(schedule_id) = schedule_id {
            self.release(job.tenant_id, schedule_id, job.is_success()).await;
        }

        info!(
            job_id = %job.id,
            status = %job.status,
            succeeded = job.succeeded,
            failed = job.failed,
            skipped = job.skipped,
            duration_ms = job.duration_ms().unwrap_or_default(),
            "refresh job finished"
        );
        result
    }

    async fn process(&self, job: &mut RefreshJob, targets: Vec<PropertyId>) -> Result<(), SchedulerError> {
        job.mark_running(Utc::now())?;
        self.log.update_job(job).await?;

        for property_id in targets {
            let started = Utc::now();
            let row = match self.properties.get(job.tenant_id, property_id).await? {
                None => RefreshHistory::skipped(job, property_id, started, NOT_FOUND),
                Some(p) if !p.is_published() => RefreshHistory::skipped(job, property_id, started, NOT_PUBLISHED),
                Some(p) => match self.sync.republish_loaded(p).await {
                    Ok(_) => RefreshHistory::success(job, property_id, started, Utc::now()),
                    Err(err) => {
                        warn!(job_id = %job.id, property_id = %property_id, error = %err, "listing refresh failed");
                        RefreshHistory::failed(job, property_id, started, Utc::now(), err.to_string())
                    }
                },
            };
            job.record(row.status)?;
            self.log.append_history(&row).await?;
        }

        job.mark_completed(Utc::now())?;
        self.log.update_job(job).await?;
        Ok(())
    }

    /// Finish the schedule's run. Errors are logged; the stale sweep recovers them.
    async fn release(&self, tenant_id: TenantId, schedule_id: ScheduleId, success: bool) {
        match self.schedules.finish_run(tenant_id, schedule_id, Utc::now(), success).await {
            Ok(Some(_)) => {}
            Ok(None) => debug!(schedule_id = %schedule_id, "schedule deleted or already released"),
            Err(err) => warn!(schedule_id = %schedule_id, error = %err, "failed to release schedule run"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenewalConfig;
    use crate::credentials::{CredentialStore, TokenManager};
    use crate::crypto::CredentialCipher;
    use crate::store::{
        HistoryQuery, InMemoryCredentialRepository, InMemoryPropertyRepository, InMemoryRefreshLogRepository,
        InMemoryScheduleRepository, InMemorySubscriptionRepository, StoreResult, SubscriptionRepository,
    };
    use async_trait::async_trait;
    use imobcrm_core::RefreshJobId;
    use crate::testing::{active_property, hourly_schedule};
    use chrono::Duration;
    use imobcrm_canalpro::{CanalProError, InMemoryMarketplace};
    use imobcrm_listings::Property;
    use imobcrm_scheduling::{JobStatus, RefreshOutcome, ScheduleTarget};
    use imobcrm_tenancy::{Plan, Subscription};

    const EMAIL: &str = "agenda@imob.com.br";
    const PASSWORD: &str = "pw";

    struct Harness {
        market: Arc<InMemoryMarketplace>,
        properties: Arc<InMemoryPropertyRepository>,
        schedules: Arc<InMemoryScheduleRepository>,
        log: Arc<InMemoryRefreshLogRepository>,
        sync: Arc<ListingSync>,
        scheduler: RefreshScheduler,
        tenant: TenantId,
    }

    async fn harness(plan: Plan) -> Harness {
        let market = Arc::new(InMemoryMarketplace::new().with_account(EMAIL, PASSWORD));
        let properties = Arc::new(InMemoryPropertyRepository::new());
        let schedules = Arc::new(InMemoryScheduleRepository::new());
        let log = Arc::new(InMemoryRefreshLogRepository::new());
        let subscriptions = Arc::new(InMemorySubscriptionRepository::new());
        let store = CredentialStore::new(
            Arc::new(InMemoryCredentialRepository::new()),
            CredentialCipher::new([3u8; 32]),
        );
        let tokens = Arc::new(TokenManager::new(market.clone(), store, RenewalConfig::default()));

        let tenant = TenantId::new();
        tokens.connect(tenant, EMAIL, PASSWORD, false).await.unwrap();
        subscriptions
            .upsert(&Subscription::start_trial(tenant, plan, Utc::now()))
            .await
            .unwrap();

        let sync = Arc::new(ListingSync::new(market.clone(), tokens, properties.clone(), subscriptions));
        let scheduler = RefreshScheduler::new(
            schedules.clone(),
            log.clone(),
            properties.clone(),
            sync.clone(),
            RefreshConfig {
                max_concurrent: 2,
                ..RefreshConfig::default()
            },
        );
        Harness {
            market,
            properties,
            schedules,
            log,
            sync,
            scheduler,
            tenant,
        }
    }

    impl Harness {
        async fn published_property(&self) -> Property {
            let p = active_property(self.tenant);
            self.properties.insert(&p).await.unwrap();
            self.sync.publish(self.tenant, p.id).await.unwrap()
        }

        /// A schedule whose first run is already an hour overdue.
        async fn due_schedule(&self, target: ScheduleTarget) -> RefreshSchedule {
            let created = Utc::now() - Duration::hours(2);
            let s = RefreshSchedule::new(self.tenant, hourly_schedule(target), created).unwrap();
            self.schedules.insert(&s).await.unwrap();
            s
        }

        async fn schedule(&self, id: ScheduleId) -> RefreshSchedule {
            self.schedules.get(self.tenant, id).await.unwrap().unwrap()
        }

        async fn jobs(&self, id: ScheduleId) -> Vec<RefreshJob> {
            self.log.list_jobs(self.tenant, Some(id), 10).await.unwrap()
        }
    }

    /// Job log whose job updates fail.
    struct BrokenJobLog(InMemoryRefreshLogRepository);

    #[async_trait]
    impl RefreshLogRepository for BrokenJobLog {
        async fn insert_job(&self, job: &RefreshJob) -> StoreResult<()> {
            self.0.insert_job(job).await
        }
        async fn update_job(&self, _job: &RefreshJob) -> StoreResult<()> {
            Err(StoreError::backend("updating refresh job", "connection reset"))
        }
        async fn get_job(&self, tenant_id: TenantId, id: RefreshJobId) -> StoreResult<Option<RefreshJob>> {
            self.0.get_job(tenant_id, id).await
        }
        async fn list_jobs(
            &self,
            tenant_id: TenantId,
            schedule_id: Option<ScheduleId>,
            limit: u32,
        ) -> StoreResult<Vec<RefreshJob>> {
            self.0.list_jobs(tenant_id, schedule_id, limit).await
        }
        async fn append_history(&self, row: &RefreshHistory) -> StoreResult<()> {
            self.0.append_history(row).await
        }
        async fn list_history(&self, tenant_id: TenantId, query: &HistoryQuery) -> StoreResult<Vec<RefreshHistory>> {
            self.0.list_history(tenant_id, query).await
        }
    }

    #[tokio::test]
    async fn tick_runs_due_schedule_and_records_history() {
        let h = harness(Plan::Basic).await;
        h.published_property().await;
        h.published_property().await;
        let s = h.due_schedule(ScheduleTarget::AllPublished).await;

        let report = h.scheduler.tick(Utc::now()).await.unwrap();
        assert_eq!(report.due, 1);
        assert_eq!(report.dispatched, 1);
        h.scheduler.wait_idle().await;

        let jobs = h.jobs(s.id).await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Completed);
        assert_eq!((jobs[0].total, jobs[0].succeeded), (2, 2));

        let history = h
            .log
            .list_history(h.tenant, &HistoryQuery { schedule_id: Some(s.id), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|r| r.status == RefreshOutcome::Success));
        assert_eq!(h.market.calls("republish_listing"), 2);

        let after = h.schedule(s.id).await;
        assert!(!after.is_running);
        assert_eq!((after.total_runs, after.successful_runs), (1, 1));
        assert!(after.next_run.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn concurrent_ticks_dispatch_a_schedule_once() {
        let h = harness(Plan::Basic).await;
        h.published_property().await;
        let s = h.due_schedule(ScheduleTarget::AllPublished).await;

        let now = Utc::now();
        let (a, b) = tokio::join!(h.scheduler.tick(now), h.scheduler.tick(now));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.dispatched + b.dispatched, 1);
        h.scheduler.wait_idle().await;

        assert_eq!(h.jobs(s.id).await.len(), 1);
        assert_eq!(h.schedule(s.id).await.total_runs, 1);
    }

    #[tokio::test]
    async fn unpublished_and_missing_targets_are_skipped() {
        let h = harness(Plan::Basic).await;
        let published = h.published_property().await;
        let unpublished = active_property(h.tenant);
        h.properties.insert(&unpublished).await.unwrap();
        let gone = PropertyId::new();
        let s = h
            .due_schedule(ScheduleTarget::Properties {
                property_ids: vec![published.id, unpublished.id, gone],
            })
            .await;

        h.scheduler.tick(Utc::now()).await.unwrap();
        h.scheduler.wait_idle().await;

        let job = &h.jobs(s.id).await[0];
        assert_eq!((job.total, job.succeeded, job.skipped, job.failed), (3, 1, 2, 0));
        assert!(job.is_success());

        let skipped = h
            .log
            .list_history(h.tenant, &HistoryQuery { property_id: Some(gone), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(skipped[0].status, RefreshOutcome::Skipped);
        assert_eq!(skipped[0].error.as_deref(), Some(NOT_FOUND));
    }

    #[tokio::test]
    async fn marketplace_errors_fail_the_property_not_the_job() {
        let h = harness(Plan::Basic).await;
        h.published_property().await;
        let s = h.due_schedule(ScheduleTarget::AllPublished).await;
        h.market.fail_next(CanalProError::GraphQl("listing blocked".into()));

        h.scheduler.tick(Utc::now()).await.unwrap();
        h.scheduler.wait_idle().await;

        let job = &h.jobs(s.id).await[0];
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.failed, 1);
        let after = h.schedule(s.id).await;
        assert_eq!((after.total_runs, after.failed_runs), (1, 1));
    }

    #[tokio::test]
    async fn tenants_without_sync_record_a_failed_run() {
        let h = harness(Plan::Free).await;
        let s = h.due_schedule(ScheduleTarget::AllPublished).await;

        let report = h.scheduler.tick(Utc::now()).await.unwrap();
        assert_eq!(report.not_entitled, 1);
        assert_eq!(report.dispatched, 0);

        let jobs = h.jobs(s.id).await;
        assert_eq!(jobs[0].status, JobStatus::Failed);
        let after = h.schedule(s.id).await;
        assert!(!after.is_running);
        assert_eq!(after.failed_runs, 1);
        assert!(after.next_run.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn stale_runs_are_released() {
        let h = harness(Plan::Basic).await;
        let mut s = RefreshSchedule::new(h.tenant, hourly_schedule(ScheduleTarget::AllPublished), Utc::now()).unwrap();
        let long_ago = Utc::now() - Duration::hours(3);
        s.begin_run(long_ago).unwrap();
        h.schedules.insert(&s).await.unwrap();
        let mut job = RefreshJob::new(h.tenant, Some(s.id), JobTrigger::Scheduled, 1, long_ago);
        job.mark_running(long_ago).unwrap();
        h.log.insert_job(&job).await.unwrap();

        let report = h.scheduler.tick(Utc::now()).await.unwrap();
        assert_eq!(report.recovered, 1);

        let after = h.schedule(s.id).await;
        assert!(!after.is_running);
        assert_eq!(after.failed_runs, 1);
        let job = h.log.get_job(h.tenant, job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn run_now_ignores_next_run_but_not_a_run_in_progress() {
        let h = harness(Plan::Basic).await;
        h.published_property().await;
        let s = RefreshSchedule::new(h.tenant, hourly_schedule(ScheduleTarget::AllPublished), Utc::now()).unwrap();
        h.schedules.insert(&s).await.unwrap();

        let job = h.scheduler.run_now(h.tenant, s.id).await.unwrap();
        assert_eq!(job.trigger, JobTrigger::Manual);
        let again = h.scheduler.run_now(h.tenant, s.id).await.unwrap_err();
        assert!(matches!(again, SchedulerError::AlreadyRunning));

        h.scheduler.wait_idle().await;
        assert_eq!(h.schedule(s.id).await.successful_runs, 1);

        let missing = h.scheduler.run_now(h.tenant, ScheduleId::new()).await.unwrap_err();
        assert!(matches!(missing, SchedulerError::ScheduleNotFound));
    }

    #[tokio::test]
    async fn single_property_refresh_is_a_standalone_job() {
        let h = harness(Plan::Basic).await;
        let p = h.published_property().await;

        let job = h.scheduler.refresh_property_now(h.tenant, p.id).await.unwrap();
        assert!(job.schedule_id.is_none());
        h.scheduler.wait_idle().await;

        let done = h.log.get_job(h.tenant, job.id).await.unwrap().unwrap();
        assert_eq!((done.status, done.succeeded), (JobStatus::Completed, 1));
        assert_eq!(h.market.calls("republish_listing"), 1);

        let unpublished = active_property(h.tenant);
        h.properties.insert(&unpublished).await.unwrap();
        let err = h.scheduler.refresh_property_now(h.tenant, unpublished.id).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Sync(SyncError::NotPublished)));
    }

    #[tokio::test]
    async fn job_log_failures_still_release_the_schedule() {
        let h = harness(Plan::Basic).await;
        h.published_property().await;
        let s = h.due_schedule(ScheduleTarget::AllPublished).await;
        let scheduler = RefreshScheduler::new(
            h.schedules.clone(),
            Arc::new(BrokenJobLog(InMemoryRefreshLogRepository::new())),
            h.properties.clone(),
            h.sync.clone(),
            RefreshConfig::default(),
        );

        assert_eq!(scheduler.tick(Utc::now()).await.unwrap().dispatched, 1);
        scheduler.wait_idle().await;

        let after = h.schedule(s.id).await;
        assert!(!after.is_running);
        assert_eq!((after.total_runs, after.failed_runs), (1, 1));
        assert!(after.next_run.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn editing_a_running_schedule_does_not_release_it() {
        let h = harness(Plan::Basic).await;
        let s = h.due_schedule(ScheduleTarget::AllPublished).await;
        h.schedules.try_claim(h.tenant, s.id, Utc::now(), true).await.unwrap().unwrap();

        let mut edited = s.clone();
        edited.name = "weekday bump".into();
        h.schedules.update(&edited).await.unwrap();

        let report = h.scheduler.tick(Utc::now()).await.unwrap();
        assert_eq!(report.dispatched, 0);
        let err = h.scheduler.run_now(h.tenant, s.id).await.unwrap_err();
        assert!(matches!(err, SchedulerError::AlreadyRunning));
        assert!(h.schedule(s.id).await.is_running);
    }
}
