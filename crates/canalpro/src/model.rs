//! Wire models of the marketplace schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An authenticated marketplace session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Whether the session expires within `skew` of `now`.
    pub fn expires_within(&self, now: DateTime<Utc>, skew: chrono::Duration) -> bool {
        self.expires_at <= now + skew
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressInput {
    pub street: String,
    #[serde(default)]
    pub street_number: Option<String>,
    #[serde(default)]
    pub complement: Option<String>,
    pub neighborhood: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    /// `FULL` or `STREET`.
    pub visibility: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingInput {
    /// `SALE` or `RENTAL`.
    pub business_type: String,
    /// Decimal string, e.g. `"850000.00"`.
    pub price: String,
    #[serde(default)]
    pub monthly_condo_fee: Option<String>,
    #[serde(default)]
    pub yearly_iptu: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageInput {
    pub url: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub order: u32,
}

/// Listing payload accepted by `createListing` / `updateListing`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingInput {
    #[serde(default)]
    pub external_code: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub business_type: String,
    pub unit_type: String,
    pub usage_type: String,
    pub publication_type: String,
    pub address: AddressInput,
    #[serde(default)]
    pub pricing_infos: Vec<PricingInput>,
    #[serde(default)]
    pub bedrooms: Option<u32>,
    #[serde(default)]
    pub suites: Option<u32>,
    #[serde(default)]
    pub bathrooms: Option<u32>,
    #[serde(default)]
    pub parking_spaces: Option<u32>,
    #[serde(default)]
    pub usable_areas: Option<f64>,
    #[serde(default)]
    pub total_areas: Option<f64>,
    #[serde(default)]
    pub floor: Option<i32>,
    #[serde(default)]
    pub amenities: Vec<String>,
    #[serde(default)]
    pub images: Vec<ImageInput>,
    #[serde(default)]
    pub floor_plans: Vec<ImageInput>,
    #[serde(default)]
    pub video_urls: Vec<String>,
}

/// A listing as returned by the marketplace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteListing {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub listing: ListingInput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingPage {
    pub items: Vec<RemoteListing>,
    pub page: u32,
    pub page_size: u32,
    pub total_count: u32,
}

impl ListingPage {
    pub fn has_more(&self) -> bool {
        u64::from(self.page) * u64::from(self.page_size) < u64::from(self.total_count)
    }
}
