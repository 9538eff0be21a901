//! `imobcrm-canalpro` — client for the CanalPro/Gandalf marketplace GraphQL API.
//!
//! - `client`: the reqwest-based HTTP client with retry/backoff
//! - `memory`: an in-process fake used by tests and local development
//! - `mapper`: translation between local listings and the marketplace schema

pub mod api;
pub mod client;
pub mod error;
pub mod graphql;
pub mod mapper;
pub mod memory;
pub mod model;

pub use api::{ApiAuth, MarketplaceApi};
pub use client::{GandalfClient, GandalfConfig};
pub use error::CanalProError;
pub use mapper::{from_remote_listing, to_listing_input};
pub use memory::InMemoryMarketplace;
pub use model::{
    AddressInput, ImageInput, ListingInput, ListingPage, PricingInput, RemoteListing, Session,
};
