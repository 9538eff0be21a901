//! Refresh scheduling domain module.
//!
//! Schedules decide *when* listings are re-submitted to the marketplace;
//! jobs and history record *what happened*. Pure logic, no IO.

pub mod history;
pub mod job;
pub mod schedule;

pub use history::{RefreshHistory, RefreshOutcome};
pub use job::{JobStatus, JobTrigger, RefreshJob};
pub use schedule::{
    DEFAULT_UTC_OFFSET_MINUTES, Frequency, RefreshSchedule, ScheduleDraft, SchedulePatch,
    ScheduleTarget,
};
