//! Subscription plans and their limits.

use serde::{Deserialize, Serialize};

use imobcrm_core::text_enum;

text_enum! {
    #[derive(Default)]
    pub enum Plan {
        Free => "free",
        #[default]
        Basic => "basic",
        Pro => "pro",
        Enterprise => "enterprise",
    }
}

text_enum! {
    /// A countable resource limited by the plan.
    pub enum Resource {
        Properties => "properties",
        Users => "users",
        Schedules => "schedules",
    }
}

/// Quotas of a plan. `None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub max_properties: Option<u32>,
    pub max_users: Option<u32>,
    pub max_schedules: Option<u32>,
    pub marketplace_sync: bool,
}

impl PlanLimits {
    pub fn max_for(&self, resource: Resource) -> Option<u32> {
        match resource {
            Resource::Properties => self.max_properties,
            Resource::Users => self.max_users,
            Resource::Schedules => self.max_schedules,
        }
    }
}

impl Plan {
    pub fn limits(&self) -> PlanLimits {
        match self {
            Plan::Free => PlanLimits {
                max_properties: Some(10),
                max_users: Some(1),
                max_schedules: Some(0),
                marketplace_sync: false,
            },
            Plan::Basic => PlanLimits {
                max_properties: Some(100),
                max_users: Some(3),
                max_schedules: Some(2),
                marketplace_sync: true,
            },
            Plan::Pro => PlanLimits {
                max_properties: Some(1_000),
                max_users: Some(10),
                max_schedules: Some(10),
                marketplace_sync: true,
            },
            Plan::Enterprise => PlanLimits {
                max_properties: None,
                max_users: None,
                max_schedules: None,
                marketplace_sync: true,
            },
        }
    }

    /// Monthly price in BRL cents.
    pub fn monthly_price_cents(&self) -> i64 {
        match self {
            Plan::Free => 0,
            Plan::Basic => 9_900,
            Plan::Pro => 29_900,
            Plan::Enterprise => 99_900,
        }
    }
}
