//! The property listing entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use imobcrm_core::{DomainError, DomainResult, Entity, PropertyId, TenantId, TenantOwned};

use crate::{
    Address, BusinessType, ListingStatus, MediaItem, Money, PropertyType, PublicationType,
    SyncStatus, Usage,
};

const MAX_TITLE_LEN: usize = 200;

/// Listing data supplied by a user (or imported from the marketplace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDraft {
    /// Tenant-side reference code shown to agents.
    #[serde(default)]
    pub reference_code: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub business_type: BusinessType,
    pub property_type: PropertyType,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub publication_type: PublicationType,
    pub address: Address,
    #[serde(default)]
    pub sale_price: Option<Money>,
    #[serde(default)]
    pub rental_price: Option<Money>,
    /// Monthly condominium fee.
    #[serde(default)]
    pub condo_fee: Option<Money>,
    /// Yearly property tax (IPTU).
    #[serde(default)]
    pub property_tax: Option<Money>,
    #[serde(default)]
    pub bedrooms: Option<u32>,
    #[serde(default)]
    pub suites: Option<u32>,
    #[serde(default)]
    pub bathrooms: Option<u32>,
    #[serde(default)]
    pub parking_spaces: Option<u32>,
    /// Square meters.
    #[serde(default)]
    pub usable_area: Option<f64>,
    #[serde(default)]
    pub total_area: Option<f64>,
    #[serde(default)]
    pub floor: Option<i32>,
    #[serde(default)]
    pub amenities: Vec<String>,
    #[serde(default)]
    pub media: Vec<MediaItem>,
}

impl PropertyDraft {
    /// Validate and normalize the draft.
    pub fn validate(mut self) -> DomainResult<Self> {
        self.title = self.title.trim().to_string();
        if self.title.is_empty() {
            return Err(DomainError::validation("title is required"));
        }
        if self.title.chars().count() > MAX_TITLE_LEN {
            return Err(DomainError::validation(format!(
                "title must be at most {MAX_TITLE_LEN} characters"
            )));
        }
        self.description = self.description.trim().to_string();
        self.reference_code = self
            .reference_code
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        if self.business_type.is_for_sale() {
            match self.sale_price {
                Some(p) if p.is_positive() => {}
                Some(_) => return Err(DomainError::validation("sale price must be positive")),
                None => return Err(DomainError::validation("sale price is required for sale listings")),
            }
        }
        if self.business_type.is_for_rent() {
            match self.rental_price {
                Some(p) if p.is_positive() => {}
                Some(_) => return Err(DomainError::validation("rental price must be positive")),
                None => {
                    return Err(DomainError::validation(
                        "rental price is required for rental listings",
                    ));
                }
            }
        }
        for (name, fee) in [("condo fee", self.condo_fee), ("property tax", self.property_tax)] {
            if fee.is_some_and(|f| f.cents() < 0) {
                return Err(DomainError::validation(format!("{name} cannot be negative")));
            }
        }

        for (name, area) in [("usable area", self.usable_area), ("total area", self.total_area)] {
            if let Some(a) = area {
                if !a.is_finite() || a <= 0.0 {
                    return Err(DomainError::validation(format!("{name} must be positive")));
                }
            }
        }
        if let (Some(usable), Some(total)) = (self.usable_area, self.total_area) {
            if usable > total {
                return Err(DomainError::validation("usable area cannot exceed total area"));
            }
        }
        if let (Some(suites), Some(bedrooms)) = (self.suites, self.bedrooms) {
            if suites > bedrooms {
                return Err(DomainError::validation("suites cannot exceed bedrooms"));
            }
        }

        self.address = self.address.normalized()?;

        let mut amenities: Vec<String> = Vec::with_capacity(self.amenities.len());
        for a in self.amenities {
            let code = a.trim().to_uppercase().replace([' ', '-'], "_");
            if !code.is_empty() && !amenities.contains(&code) {
                amenities.push(code);
            }
        }
        self.amenities = amenities;

        if self.media.iter().any(|m| m.url.trim().is_empty()) {
            return Err(DomainError::validation("media url cannot be empty"));
        }
        self.media.sort_by_key(|m| m.position);

        Ok(self)
    }
}

/// Partial update of a listing. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropertyPatch {
    pub reference_code: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub business_type: Option<BusinessType>,
    pub property_type: Option<PropertyType>,
    pub usage: Option<Usage>,
    pub publication_type: Option<PublicationType>,
    pub status: Option<ListingStatus>,
    pub address: Option<Address>,
    pub sale_price: Option<Money>,
    pub rental_price: Option<Money>,
    pub condo_fee: Option<Money>,
    pub property_tax: Option<Money>,
    pub bedrooms: Option<u32>,
    pub suites: Option<u32>,
    pub bathrooms: Option<u32>,
    pub parking_spaces: Option<u32>,
    pub usable_area: Option<f64>,
    pub total_area: Option<f64>,
    pub floor: Option<i32>,
    pub amenities: Option<Vec<String>>,
    pub media: Option<Vec<MediaItem>>,
}

impl PropertyPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the patch, re-validating the resulting listing as a whole.
    ///
    /// A listing already synced becomes `Outdated` when its content changes.
    pub fn apply(self, property: &mut Property, now: DateTime<Utc>) -> DomainResult<()> {
        let mut draft = property.to_draft();
        if let Some(v) = self.reference_code {
            draft.reference_code = Some(v);
        }
        if let Some(v) = self.title {
            draft.title = v;
        }
        if let Some(v) = self.description {
            draft.description = v;
        }
        if let Some(v) = self.business_type {
            draft.business_type = v;
        }
        if let Some(v) = self.property_type {
            draft.property_type = v;
        }
        if let Some(v) = self.usage {
            draft.usage = v;
        }
        if let Some(v) = self.publication_type {
            draft.publication_type = v;
        }
        if let Some(v) = self.address {
            draft.address = v;
        }
        draft.sale_price = self.sale_price.or(draft.sale_price);
        draft.rental_price = self.rental_price.or(draft.rental_price);
        draft.condo_fee = self.condo_fee.or(draft.condo_fee);
        draft.property_tax = self.property_tax.or(draft.property_tax);
        draft.bedrooms = self.bedrooms.or(draft.bedrooms);
        draft.suites = self.suites.or(draft.suites);
        draft.bathrooms = self.bathrooms.or(draft.bathrooms);
        draft.parking_spaces = self.parking_spaces.or(draft.parking_spaces);
        draft.usable_area = self.usable_area.or(draft.usable_area);
        draft.total_area = self.total_area.or(draft.total_area);
        draft.floor = self.floor.or(draft.floor);
        if let Some(v) = self.amenities {
            draft.amenities = v;
        }
        if let Some(v) = self.media {
            draft.media = v;
        }

        let draft = draft.validate()?;
        let content_changed = draft != property.to_draft();
        property.set_content(draft);
        if let Some(status) = self.status {
            property.status = status;
        }
        if content_changed && matches!(property.sync_status, SyncStatus::Synced | SyncStatus::Pending) {
            property.sync_status = SyncStatus::Outdated;
        }
        property.updated_at = now;
        Ok(())
    }
}

/// A property listing owned by one tenant.
///
/// Mirrors the marketplace listing schema plus local lifecycle and sync state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub id: PropertyId,
    pub tenant_id: TenantId,
    pub reference_code: Option<String>,
    pub title: String,
    pub description: String,
    pub business_type: BusinessType,
    pub property_type: PropertyType,
    pub usage: Usage,
    pub publication_type: PublicationType,
    pub status: ListingStatus,
    pub address: Address,
    pub sale_price: Option<Money>,
    pub rental_price: Option<Money>,
    pub condo_fee: Option<Money>,
    pub property_tax: Option<Money>,
    pub bedrooms: Option<u32>,
    pub suites: Option<u32>,
    pub bathrooms: Option<u32>,
    pub parking_spaces: Option<u32>,
    pub usable_area: Option<f64>,
    pub total_area: Option<f64>,
    pub floor: Option<i32>,
    pub amenities: Vec<String>,
    pub media: Vec<MediaItem>,

    /// Marketplace listing id once published.
    pub external_id: Option<String>,
    pub sync_status: SyncStatus,
    pub sync_error: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Property {
    pub fn create(tenant_id: TenantId, draft: PropertyDraft, now: DateTime<Utc>) -> DomainResult<Self> {
        let draft = draft.validate()?;
        Ok(Self {
            id: PropertyId::new(),
            tenant_id,
            reference_code: draft.reference_code,
            title: draft.title,
            description: draft.description,
            business_type: draft.business_type,
            property_type: draft.property_type,
            usage: draft.usage,
            publication_type: draft.publication_type,
            status: ListingStatus::Draft,
            address: draft.address,
            sale_price: draft.sale_price,
            rental_price: draft.rental_price,
            condo_fee: draft.condo_fee,
            property_tax: draft.property_tax,
            bedrooms: draft.bedrooms,
            suites: draft.suites,
            bathrooms: draft.bathrooms,
            parking_spaces: draft.parking_spaces,
            usable_area: draft.usable_area,
            total_area: draft.total_area,
            floor: draft.floor,
            amenities: draft.amenities,
            media: draft.media,
            external_id: None,
            sync_status: SyncStatus::NotSynced,
            sync_error: None,
            last_synced_at: None,
            published_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// The user-editable content of this listing.
    pub fn to_draft(&self) -> PropertyDraft {
        PropertyDraft {
            reference_code: self.reference_code.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            business_type: self.business_type,
            property_type: self.property_type,
            usage: self.usage,
            publication_type: self.publication_type,
            address: self.address.clone(),
            sale_price: self.sale_price,
            rental_price: self.rental_price,
            condo_fee: self.condo_fee,
            property_tax: self.property_tax,
            bedrooms: self.bedrooms,
            suites: self.suites,
            bathrooms: self.bathrooms,
            parking_spaces: self.parking_spaces,
            usable_area: self.usable_area,
            total_area: self.total_area,
            floor: self.floor,
            amenities: self.amenities.clone(),
            media: self.media.clone(),
        }
    }

    fn set_content(&mut self, d: PropertyDraft) {
        self.reference_code = d.reference_code;
        self.title = d.title;
        self.description = d.description;
        self.business_type = d.business_type;
        self.property_type = d.property_type;
        self.usage = d.usage;
        self.publication_type = d.publication_type;
        self.address = d.address;
        self.sale_price = d.sale_price;
        self.rental_price = d.rental_price;
        self.condo_fee = d.condo_fee;
        self.property_tax = d.property_tax;
        self.bedrooms = d.bedrooms;
        self.suites = d.suites;
        self.bathrooms = d.bathrooms;
        self.parking_spaces = d.parking_spaces;
        self.usable_area = d.usable_area;
        self.total_area = d.total_area;
        self.floor = d.floor;
        self.amenities = d.amenities;
        self.media = d.media;
    }

    /// Overwrite the content with a marketplace copy, keeping local identity.
    pub fn replace_content(&mut self, draft: PropertyDraft, now: DateTime<Utc>) -> DomainResult<()> {
        let draft = draft.validate()?;
        self.set_content(draft);
        self.updated_at = now;
        Ok(())
    }

    /// Whether the listing currently exists on the marketplace.
    pub fn is_published(&self) -> bool {
        self.external_id.is_some()
    }

    /// Only active listings may be sent to the marketplace.
    pub fn ensure_publishable(&self) -> DomainResult<()> {
        match self.status {
            ListingStatus::Active => Ok(()),
            ListingStatus::Draft => Err(DomainError::invariant(
                "draft listings must be activated before publishing",
            )),
            other => Err(DomainError::invariant(format!(
                "listings with status '{other}' cannot be published"
            ))),
        }
    }

    pub fn mark_sync_pending(&mut self, now: DateTime<Utc>) {
        self.sync_status = SyncStatus::Pending;
        self.updated_at = now;
    }

    pub fn mark_synced(&mut self, external_id: impl Into<String>, at: DateTime<Utc>) {
        self.external_id = Some(external_id.into());
        self.sync_status = SyncStatus::Synced;
        self.sync_error = None;
        self.last_synced_at = Some(at);
        if self.published_at.is_none() {
            self.published_at = Some(at);
        }
        self.updated_at = at;
    }

    /// Record a failed sync. The external id (if any) is kept.
    pub fn mark_sync_failed(&mut self, error: impl Into<String>, at: DateTime<Utc>) {
        self.sync_status = SyncStatus::Failed;
        self.sync_error = Some(error.into());
        self.updated_at = at;
    }

    /// Take the marketplace bookkeeping of `synced`, a copy of this row that
    /// went through a sync, leaving the content as it is now.
    ///
    /// Content edited while the sync was in flight stays `Outdated`.
    pub fn adopt_sync_state(&mut self, synced: &Property) {
        let edited_meanwhile =
            self.sync_status == SyncStatus::Outdated && synced.sync_status == SyncStatus::Synced;
        if !edited_meanwhile {
            self.sync_status = synced.sync_status;
        }
        self.external_id = synced.external_id.clone();
        self.sync_error = synced.sync_error.clone();
        self.last_synced_at = synced.last_synced_at;
        self.published_at = synced.published_at;
        self.updated_at = self.updated_at.max(synced.updated_at);
    }

    pub fn mark_unpublished(&mut self, at: DateTime<Utc>) {
        self.external_id = None;
        self.sync_status = SyncStatus::NotSynced;
        self.sync_error = None;
        self.published_at = None;
        self.updated_at = at;
    }
}

impl Entity for Property {
    type Id = PropertyId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl TenantOwned for Property {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> PropertyDraft {
        PropertyDraft {
            reference_code: Some(" AP-01 ".into()),
            title: "  Apartamento na Paulista ".into(),
            description: String::new(),
            business_type: BusinessType::Sale,
            property_type: PropertyType::Apartment,
            usage: Usage::Residential,
            publication_type: PublicationType::Standard,
            address: Address {
                street: "Av. Paulista".into(),
                number: Some("1000".into()),
                neighborhood: "Bela Vista".into(),
                city: "São Paulo".into(),
                state: "SP".into(),
                zip_code: "01310-100".into(),
                ..Default::default()
            },
            sale_price: Some(Money::from_reais(850_000)),
            rental_price: None,
            condo_fee: None,
            property_tax: None,
            bedrooms: Some(2),
            suites: Some(1),
            bathrooms: Some(2),
            parking_spaces: Some(1),
            usable_area: Some(72.5),
            total_area: Some(90.0),
            floor: Some(8),
            amenities: vec!["pool".into(), "POOL".into(), "gym room".into()],
            media: vec![],
        }
    }

    #[test]
    fn create_normalizes_fields() {
        let p = Property::create(TenantId::new(), draft(), Utc::now()).unwrap();
        assert_eq!(p.title, "Apartamento na Paulista");
        assert_eq!(p.reference_code.as_deref(), Some("AP-01"));
        assert_eq!(p.amenities, vec!["POOL".to_string(), "GYM_ROOM".to_string()]);
        assert_eq!(p.status, ListingStatus::Draft);
        assert_eq!(p.sync_status, SyncStatus::NotSynced);
    }

    #[test]
    fn prices_must_match_business_type() {
        let mut d = draft();
        d.business_type = BusinessType::Rental;
        assert!(d.clone().validate().is_err());

        d.rental_price = Some(Money::from_reais(4_000));
        assert!(d.clone().validate().is_ok());

        d.business_type = BusinessType::SaleAndRental;
        d.sale_price = None;
        assert!(d.validate().is_err());
    }

    #[test]
    fn rejects_bad_title_cep_and_areas() {
        let mut d = draft();
        d.title = "   ".into();
        assert!(d.validate().is_err());

        let mut d = draft();
        d.address.zip_code = "123".into();
        assert!(d.validate().is_err());

        let mut d = draft();
        d.usable_area = Some(0.0);
        assert!(d.validate().is_err());

        let mut d = draft();
        d.usable_area = Some(120.0);
        assert!(d.validate().is_err());
    }

    #[test]
    fn patch_on_synced_listing_marks_it_outdated() {
        let now = Utc::now();
        let mut p = Property::create(TenantId::new(), draft(), now).unwrap();
        p.mark_synced("ext-1", now);

        PropertyPatch {
            sale_price: Some(Money::from_reais(800_000)),
            ..Default::default()
        }
        .apply(&mut p, now)
        .unwrap();

        assert_eq!(p.sale_price, Some(Money::from_reais(800_000)));
        assert_eq!(p.sync_status, SyncStatus::Outdated);
    }

    #[test]
    fn sync_state_is_adopted_without_reverting_content() {
        let now = Utc::now();
        let mut snapshot = Property::create(TenantId::new(), draft(), now).unwrap();
        snapshot.mark_synced("ext-1", now);

        let mut current = snapshot.clone();
        PropertyPatch {
            title: Some("Cobertura duplex".into()),
            ..Default::default()
        }
        .apply(&mut current, now)
        .unwrap();

        snapshot.mark_synced("ext-1", now + chrono::Duration::seconds(5));
        current.adopt_sync_state(&snapshot);

        assert_eq!(current.title, "Cobertura duplex");
        assert_eq!(current.sync_status, SyncStatus::Outdated);
        assert_eq!(current.last_synced_at, Some(now + chrono::Duration::seconds(5)));

        snapshot.mark_sync_failed("boom", now);
        current.adopt_sync_state(&snapshot);
        assert_eq!(current.sync_status, SyncStatus::Failed);
        assert_eq!(current.external_id.as_deref(), Some("ext-1"));
    }

    #[test]
    fn status_only_patch_keeps_sync_state() {
        let now = Utc::now();
        let mut p = Property::create(TenantId::new(), draft(), now).unwrap();
        p.mark_synced("ext-1", now);

        PropertyPatch {
            status: Some(ListingStatus::Active),
            ..Default::default()
        }
        .apply(&mut p, now)
        .unwrap();

        assert_eq!(p.status, ListingStatus::Active);
        assert_eq!(p.sync_status, SyncStatus::Synced);
    }

    #[test]
    fn invalid_patch_leaves_listing_untouched() {
        let now = Utc::now();
        let mut p = Property::create(TenantId::new(), draft(), now).unwrap();
        let before = p.clone();

        let res = PropertyPatch {
            title: Some(String::new()),
            ..Default::default()
        }
        .apply(&mut p, now);

        assert!(res.is_err());
        assert_eq!(p, before);
    }

    #[test]
    fn sync_bookkeeping() {
        let now = Utc::now();
        let mut p = Property::create(TenantId::new(), draft(), now).unwrap();
        assert!(p.ensure_publishable().is_err());
        p.status = ListingStatus::Active;
        assert!(p.ensure_publishable().is_ok());

        p.mark_sync_pending(now);
        assert_eq!(p.sync_status, SyncStatus::Pending);

        p.mark_synced("ext-9", now);
        assert!(p.is_published());
        assert_eq!(p.published_at, Some(now));

        p.mark_sync_failed("boom", now);
        assert_eq!(p.sync_status, SyncStatus::Failed);
        assert_eq!(p.external_id.as_deref(), Some("ext-9"));

        p.mark_unpublished(now);
        assert!(!p.is_published());
        assert_eq!(p.sync_status, SyncStatus::NotSynced);
        assert!(p.published_at.is_none());
    }
}
