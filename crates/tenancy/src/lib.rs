//! Tenancy domain module: tenants, plans, subscriptions and partnerships.

pub mod partnership;
pub mod plan;
pub mod subscription;
pub mod tenant;

pub use partnership::{Partnership, PartnershipStatus, SharedProperty};
pub use plan::{Plan, PlanLimits, Resource};
pub use subscription::{GRACE_PERIOD_DAYS, Subscription, SubscriptionStatus, TRIAL_DAYS};
pub use tenant::{Tenant, TenantStatus, slugify};
