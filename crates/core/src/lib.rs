//! `imobcrm-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod entity;
pub mod error;
pub mod id;
pub mod retry;
pub mod text_enum;
pub mod value_object;

pub use entity::{Entity, TenantOwned};
pub use error::{DomainError, DomainResult};
pub use id::{
    PartnershipId, PropertyId, RefreshJobId, ScheduleId, SubscriptionId, TenantId, UserId,
};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use value_object::ValueObject;
