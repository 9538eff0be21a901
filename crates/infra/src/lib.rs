//! Infrastructure layer: storage, config, credentials, marketplace sync and
//! background tasks.

pub mod config;
pub mod credentials;
pub mod crypto;
pub mod db;
pub mod scheduler;
pub mod store;
pub mod sync;
pub mod tasks;
pub mod worker;

#[cfg(test)]
mod testing;

pub use config::{AppConfig, ConfigError, RefreshConfig, RenewalConfig};
pub use credentials::{
    CANALPRO, ConnectionStatus, CredentialError, CredentialStore, IntegrationCredentials, RenewalError,
    RenewalReport, TokenManager,
};
pub use crypto::{CredentialCipher, CryptoError};
pub use db::Database;
pub use scheduler::{RefreshScheduler, SchedulerError, TickReport};
pub use store::{HistoryQuery, PropertyFilter, StoreError, StoreResult, Stores};
pub use sync::{ImportReport, ListingSync, SyncError};
pub use tasks::{TaskHandle, spawn_periodic};
pub use worker::{WorkerPool, WorkerStats};
