//! Refresh job: one execution of a schedule (or a manual refresh).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use imobcrm_core::{
    DomainError, DomainResult, Entity, RefreshJobId, ScheduleId, TenantId, TenantOwned, text_enum,
};

use crate::RefreshOutcome;

text_enum! {
    /// What started the job.
    pub enum JobTrigger {
        /// Fired by the periodic beat.
        Scheduled => "scheduled",
        /// Requested through the API.
        Manual => "manual",
    }
}

text_enum! {
    pub enum JobStatus {
        /// Created, waiting for a worker
        Pending => "pending",
        /// Currently being executed
        Running => "running",
        /// Every target was processed (individual failures are counted)
        Completed => "completed",
        /// Aborted before processing the targets
        Failed => "failed",
    }
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// One execution attempt.
///
/// `succeeded + failed + skipped` never exceeds `total`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshJob {
    pub id: RefreshJobId,
    pub tenant_id: TenantId,
    /// `None` for a one-off property refresh.
    pub schedule_id: Option<ScheduleId>,
    pub trigger: JobTrigger,
    pub status: JobStatus,
    pub total: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub skipped: u32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RefreshJob {
    pub fn new(
        tenant_id: TenantId,
        schedule_id: Option<ScheduleId>,
        trigger: JobTrigger,
        total: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RefreshJobId::new(),
            tenant_id,
            schedule_id,
            trigger,
            status: JobStatus::Pending,
            total,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            error: None,
            created_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn processed(&self) -> u32 {
        self.succeeded + self.failed + self.skipped
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != JobStatus::Pending {
            return Err(DomainError::invariant(format!(
                "job is {} and cannot start",
                self.status
            )));
        }
        self.status = JobStatus::Running;
        self.started_at = Some(now);
        Ok(())
    }

    /// Count the outcome of one target.
    pub fn record(&mut self, outcome: RefreshOutcome) -> DomainResult<()> {
        if self.status != JobStatus::Running {
            return Err(DomainError::invariant("job is not running"));
        }
        if self.processed() >= self.total {
            return Err(DomainError::invariant("job has no targets left"));
        }
        match outcome {
            RefreshOutcome::Success => self.succeeded += 1,
            RefreshOutcome::Failed => self.failed += 1,
            RefreshOutcome::Skipped => self.skipped += 1,
        }
        Ok(())
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != JobStatus::Running {
            return Err(DomainError::invariant("job is not running"));
        }
        self.status = JobStatus::Completed;
        self.finished_at = Some(now);
        Ok(())
    }

    /// Abort the job. Allowed from any non-terminal state.
    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status.is_terminal() {
            return Err(DomainError::invariant(format!("job is already {}", self.status)));
        }
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.started_at.get_or_insert(now);
        self.finished_at = Some(now);
        Ok(())
    }

    /// Whether the run as a whole counts as successful for schedule stats.
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed && self.failed == 0
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(s), Some(f)) => Some((f - s).num_milliseconds().max(0)),
            _ => None,
        }
    }
}

impl Entity for RefreshJob {
    type Id = RefreshJobId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl TenantOwned for RefreshJob {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn job(total: u32) -> RefreshJob {
        RefreshJob::new(TenantId::new(), Some(ScheduleId::new()), JobTrigger::Scheduled, total, Utc::now())
    }

    #[test]
    fn lifecycle_counts_outcomes() {
        let now = Utc::now();
        let mut j = job(3);
        assert!(j.record(RefreshOutcome::Success).is_err());

        j.mark_running(now).unwrap();
        j.record(RefreshOutcome::Success).unwrap();
        j.record(RefreshOutcome::Failed).unwrap();
        j.record(RefreshOutcome::Skipped).unwrap();
        assert!(j.record(RefreshOutcome::Success).is_err());

        j.mark_completed(now + Duration::seconds(2)).unwrap();
        assert_eq!(j.processed(), j.total);
        assert_eq!(j.duration_ms(), Some(2_000));
        assert!(!j.is_success());
    }

    #[test]
    fn cannot_start_twice_or_fail_after_completion() {
        let now = Utc::now();
        let mut j = job(0);
        j.mark_running(now).unwrap();
        assert!(j.mark_running(now).is_err());
        j.mark_completed(now).unwrap();
        assert!(j.is_success());
        assert!(j.mark_failed("late", now).is_err());
    }

    #[test]
    fn pending_job_can_fail() {
        let now = Utc::now();
        let mut j = job(5);
        j.mark_failed("no credentials", now).unwrap();
        assert_eq!(j.status, JobStatus::Failed);
        assert_eq!(j.error.as_deref(), Some("no credentials"));
        assert_eq!(j.duration_ms(), Some(0));
    }
}
