//! Refresh schedules and next-run computation.

use chrono::{
    DateTime, Datelike, Days, Duration, FixedOffset, NaiveTime, Offset, TimeZone, Utc, Weekday,
};
use serde::{Deserialize, Serialize};

use imobcrm_core::{DomainError, DomainResult, Entity, PropertyId, ScheduleId, TenantId, TenantOwned};

/// Brasília time (UTC-3).
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = -180;

const MAX_OFFSET_MINUTES: i32 = 14 * 60;

fn default_offset() -> i32 {
    DEFAULT_UTC_OFFSET_MINUTES
}

fn default_true() -> bool {
    true
}

/// How often a schedule fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frequency {
    /// Every day at the local time slot.
    Daily,
    /// At the local time slot on the listed weekdays.
    Weekly { days: Vec<Weekday> },
    /// Every `hours` hours after the previous run.
    EveryHours { hours: u32 },
}

/// Which listings a schedule refreshes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleTarget {
    Properties { property_ids: Vec<PropertyId> },
    AllPublished,
}

/// User input for a new schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleDraft {
    pub name: String,
    /// Local time of day the schedule fires.
    pub time_slot: NaiveTime,
    #[serde(default = "default_offset")]
    pub utc_offset_minutes: i32,
    pub frequency: Frequency,
    pub target: ScheduleTarget,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl ScheduleDraft {
    pub fn validate(mut self) -> DomainResult<Self> {
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            return Err(DomainError::validation("schedule name is required"));
        }
        if self.utc_offset_minutes.abs() > MAX_OFFSET_MINUTES {
            return Err(DomainError::validation("utc offset must be within ±14 hours"));
        }
        match &mut self.frequency {
            Frequency::Daily => {}
            Frequency::Weekly { days } => {
                if days.is_empty() {
                    return Err(DomainError::validation("weekly schedules need at least one day"));
                }
                days.sort_by_key(|d| d.num_days_from_monday());
                days.dedup();
            }
            Frequency::EveryHours { hours } => {
                if *hours == 0 {
                    return Err(DomainError::validation("every_hours must be at least 1"));
                }
            }
        }
        if let ScheduleTarget::Properties { property_ids } = &mut self.target {
            if property_ids.is_empty() {
                return Err(DomainError::validation("schedule needs at least one property"));
            }
            property_ids.sort();
            property_ids.dedup();
        }
        Ok(self)
    }
}

/// Partial update of a schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulePatch {
    pub name: Option<String>,
    pub time_slot: Option<NaiveTime>,
    pub utc_offset_minutes: Option<i32>,
    pub frequency: Option<Frequency>,
    pub target: Option<ScheduleTarget>,
}

/// A tenant's recurring refresh of a set of listings.
///
/// # Invariants
/// - An inactive schedule has no `next_run`.
/// - `running_since` is set exactly when `is_running` is.
/// - `total_runs == successful_runs + failed_runs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSchedule {
    pub id: ScheduleId,
    pub tenant_id: TenantId,
    pub name: String,
    pub time_slot: NaiveTime,
    pub utc_offset_minutes: i32,
    pub frequency: Frequency,
    pub target: ScheduleTarget,

    pub is_active: bool,
    pub is_running: bool,
    pub running_since: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub total_runs: u32,
    pub successful_runs: u32,
    pub failed_runs: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RefreshSchedule {
    pub fn new(tenant_id: TenantId, draft: ScheduleDraft, now: DateTime<Utc>) -> DomainResult<Self> {
        let draft = draft.validate()?;
        let mut schedule = Self {
            id: ScheduleId::new(),
            tenant_id,
            name: draft.name,
            time_slot: draft.time_slot,
            utc_offset_minutes: draft.utc_offset_minutes,
            frequency: draft.frequency,
            target: draft.target,
            is_active: draft.is_active,
            is_running: false,
            running_since: None,
            next_run: None,
            last_run: None,
            total_runs: 0,
            successful_runs: 0,
            failed_runs: 0,
            created_at: now,
            updated_at: now,
        };
        if schedule.is_active {
            schedule.next_run = Some(schedule.compute_next_run(now));
        }
        Ok(schedule)
    }

    fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    /// The next firing instant strictly after `after`.
    pub fn compute_next_run(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let days = match &self.frequency {
            Frequency::EveryHours { hours } => return after + Duration::hours(i64::from(*hours)),
            Frequency::Daily => None,
            Frequency::Weekly { days } => Some(days.as_slice()),
        };

        let offset = self.offset();
        let local_date = after.with_timezone(&offset).date_naive();
        for d in 0..=7 {
            let Some(date) = local_date.checked_add_days(Days::new(d)) else {
                break;
            };
            if let Some(days) = days {
                if !days.contains(&date.weekday()) {
                    continue;
                }
            }
            let Some(candidate) = offset.from_local_datetime(&date.and_time(self.time_slot)).single()
            else {
                continue;
            };
            let candidate = candidate.with_timezone(&Utc);
            if candidate > after {
                return candidate;
            }
        }
        // Only reachable with an empty weekday list, which validation rejects.
        after + Duration::days(1)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_running && self.next_run.is_some_and(|t| t <= now)
    }

    /// Property ids for an explicit target, `None` for "all published".
    pub fn explicit_properties(&self) -> Option<&[PropertyId]> {
        match &self.target {
            ScheduleTarget::Properties { property_ids } => Some(property_ids),
            ScheduleTarget::AllPublished => None,
        }
    }

    pub fn begin_run(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.is_active {
            return Err(DomainError::invariant("schedule is not active"));
        }
        if self.is_running {
            return Err(DomainError::conflict("schedule is already running"));
        }
        self.is_running = true;
        self.running_since = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn finish_run(&mut self, now: DateTime<Utc>, success: bool) {
        self.total_runs += 1;
        if success {
            self.successful_runs += 1;
        } else {
            self.failed_runs += 1;
        }
        self.is_running = false;
        self.running_since = None;
        self.last_run = Some(now);
        self.next_run = self.is_active.then(|| self.compute_next_run(now));
        self.updated_at = now;
    }

    /// Release a run that has been `is_running` for longer than `stale_after`.
    ///
    /// The abandoned run counts as failed. Returns whether anything changed.
    pub fn recover_if_stale(&mut self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        match self.running_since {
            Some(since) if self.is_running && now - since >= stale_after => {
                self.finish_run(now, false);
                true
            }
            _ => false,
        }
    }

    pub fn activate(&mut self, now: DateTime<Utc>) {
        self.is_active = true;
        self.next_run = Some(self.compute_next_run(now));
        self.updated_at = now;
    }

    /// Stop future runs. A run in progress finishes normally.
    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        self.is_active = false;
        self.next_run = None;
        self.updated_at = now;
    }

    pub fn update(&mut self, patch: SchedulePatch, now: DateTime<Utc>) -> DomainResult<()> {
        let draft = ScheduleDraft {
            name: patch.name.unwrap_or_else(|| self.name.clone()),
            time_slot: patch.time_slot.unwrap_or(self.time_slot),
            utc_offset_minutes: patch.utc_offset_minutes.unwrap_or(self.utc_offset_minutes),
            frequency: patch.frequency.unwrap_or_else(|| self.frequency.clone()),
            target: patch.target.unwrap_or_else(|| self.target.clone()),
            is_active: self.is_active,
        }
        .validate()?;

        self.name = draft.name;
        self.time_slot = draft.time_slot;
        self.utc_offset_minutes = draft.utc_offset_minutes;
        self.frequency = draft.frequency;
        self.target = draft.target;
        if self.is_active {
            self.next_run = Some(self.compute_next_run(now));
        }
        self.updated_at = now;
        Ok(())
    }
}

impl Entity for RefreshSchedule {
    type Id = ScheduleId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl TenantOwned for RefreshSchedule {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}
