//! Tenant subscription state machine.
//!
//! No payment gateway: transitions are driven by API calls.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use imobcrm_core::{
    DomainError, DomainResult, Entity, SubscriptionId, TenantId, TenantOwned, text_enum,
};

use crate::{Plan, Resource};

/// Length of the signup trial.
pub const TRIAL_DAYS: i64 = 14;

/// How long a past-due subscription keeps its entitlements.
pub const GRACE_PERIOD_DAYS: i64 = 7;

const BILLING_PERIOD_DAYS: i64 = 30;

text_enum! {
    pub enum SubscriptionStatus {
        Trialing => "trialing",
        Active => "active",
        PastDue => "past_due",
        Canceled => "canceled",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub tenant_id: TenantId,
    pub plan: Plan,
    pub status: SubscriptionStatus,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub past_due_since: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn start_trial(tenant_id: TenantId, plan: Plan, now: DateTime<Utc>) -> Self {
        let trial_end = now + Duration::days(TRIAL_DAYS);
        Self {
            id: SubscriptionId::new(),
            tenant_id,
            plan,
            status: SubscriptionStatus::Trialing,
            trial_ends_at: Some(trial_end),
            current_period_start: now,
            current_period_end: trial_end,
            past_due_since: None,
            canceled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Start a paid period (end of trial, payment after past-due, or reactivation).
    pub fn activate(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status == SubscriptionStatus::Active {
            return Err(DomainError::conflict("subscription is already active"));
        }
        self.status = SubscriptionStatus::Active;
        self.trial_ends_at = None;
        self.past_due_since = None;
        self.canceled_at = None;
        self.current_period_start = now;
        self.current_period_end = now + Duration::days(BILLING_PERIOD_DAYS);
        self.updated_at = now;
        Ok(())
    }

    /// Extend by one billing period.
    pub fn renew(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        match self.status {
            SubscriptionStatus::Active | SubscriptionStatus::PastDue => {}
            other => {
                return Err(DomainError::invariant(format!(
                    "cannot renew a {other} subscription"
                )));
            }
        }
        let start = self.current_period_end.max(now);
        self.status = SubscriptionStatus::Active;
        self.past_due_since = None;
        self.current_period_start = start;
        self.current_period_end = start + Duration::days(BILLING_PERIOD_DAYS);
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_past_due(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        match self.status {
            SubscriptionStatus::Active | SubscriptionStatus::Trialing => {}
            other => {
                return Err(DomainError::invariant(format!(
                    "cannot mark a {other} subscription past due"
                )));
            }
        }
        self.status = SubscriptionStatus::PastDue;
        self.past_due_since = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status == SubscriptionStatus::Canceled {
            return Err(DomainError::invariant("subscription is already canceled"));
        }
        self.status = SubscriptionStatus::Canceled;
        self.canceled_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn change_plan(&mut self, plan: Plan, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status == SubscriptionStatus::Canceled {
            return Err(DomainError::invariant("cannot change the plan of a canceled subscription"));
        }
        if self.plan == plan {
            return Err(DomainError::conflict(format!("already on plan {plan}")));
        }
        self.plan = plan;
        self.updated_at = now;
        Ok(())
    }

    /// Whether the tenant may currently use paid features.
    pub fn is_entitled(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            SubscriptionStatus::Active => true,
            SubscriptionStatus::Trialing => self.trial_ends_at.is_some_and(|end| now < end),
            SubscriptionStatus::PastDue => self
                .past_due_since
                .is_some_and(|since| now < since + Duration::days(GRACE_PERIOD_DAYS)),
            SubscriptionStatus::Canceled => false,
        }
    }

    /// Fail with `LimitExceeded` if adding one more `resource` would exceed the plan.
    pub fn ensure_capacity(&self, resource: Resource, current_count: u64) -> DomainResult<()> {
        match self.plan.limits().max_for(resource) {
            Some(max) if current_count >= u64::from(max) => Err(DomainError::limit_exceeded(format!(
                "plan {} allows at most {max} {resource}",
                self.plan
            ))),
            _ => Ok(()),
        }
    }

    /// Marketplace sync needs both an entitled subscription and a plan that includes it.
    pub fn ensure_marketplace_sync(&self, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.is_entitled(now) {
            return Err(DomainError::limit_exceeded(format!(
                "subscription is {} and not entitled",
                self.status
            )));
        }
        if !self.plan.limits().marketplace_sync {
            return Err(DomainError::limit_exceeded(format!(
                "plan {} does not include marketplace sync",
                self.plan
            )));
        }
        Ok(())
    }
}

impl Entity for Subscription {
    type Id = SubscriptionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl TenantOwned for Subscription {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}
