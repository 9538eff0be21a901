//! Per-property refresh history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use imobcrm_core::{PropertyId, RefreshJobId, ScheduleId, TenantId, text_enum};

use crate::RefreshJob;

text_enum! {
    pub enum RefreshOutcome {
        Success => "success",
        Failed => "failed",
        /// Not attempted (e.g. the listing was never published).
        Skipped => "skipped",
    }
}

/// Result of refreshing one property within one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshHistory {
    pub tenant_id: TenantId,
    pub job_id: Option<RefreshJobId>,
    pub schedule_id: Option<ScheduleId>,
    pub property_id: PropertyId,
    pub status: RefreshOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub error: Option<String>,
}

impl RefreshHistory {
    fn new(
        job: &RefreshJob,
        property_id: PropertyId,
        status: RefreshOutcome,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        error: Option<String>,
    ) -> Self {
        Self {
            tenant_id: job.tenant_id,
            job_id: Some(job.id),
            schedule_id: job.schedule_id,
            property_id,
            status,
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds().max(0),
            error,
        }
    }

    pub fn success(
        job: &RefreshJob,
        property_id: PropertyId,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self::new(job, property_id, RefreshOutcome::Success, started_at, finished_at, None)
    }

    pub fn failed(
        job: &RefreshJob,
        property_id: PropertyId,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        error: impl Into<String>,
    ) -> Self {
        Self::new(
            job,
            property_id,
            RefreshOutcome::Failed,
            started_at,
            finished_at,
            Some(error.into()),
        )
    }

    pub fn skipped(
        job: &RefreshJob,
        property_id: PropertyId,
        at: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(job, property_id, RefreshOutcome::Skipped, at, at, Some(reason.into()))
    }
}
