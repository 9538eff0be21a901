//! Property listings domain module.
//!
//! Business rules for the tenant's property catalogue and its marketplace
//! synchronization bookkeeping. Pure domain logic (no IO, no HTTP, no storage).

pub mod kinds;
pub mod property;
pub mod value;

pub use kinds::{BusinessType, ListingStatus, PropertyType, PublicationType, SyncStatus, Usage};
pub use property::{Property, PropertyDraft, PropertyPatch};
pub use value::{Address, MediaItem, MediaKind, Money, normalize_cep};
