//! Fixtures shared by the unit tests of this crate.

use chrono::{NaiveTime, Utc};

use imobcrm_core::TenantId;
use imobcrm_listings::{
    Address, BusinessType, ListingStatus, Money, Property, PropertyDraft, PropertyType, PublicationType, Usage,
};
use imobcrm_scheduling::{Frequency, ScheduleDraft, ScheduleTarget};

pub fn property_draft() -> PropertyDraft {
    PropertyDraft {
        reference_code: Some("AP-101".into()),
        title: "Apartamento em Boa Viagem".into(),
        description: "Vista mar, andar alto".into(),
        business_type: BusinessType::Sale,
        property_type: PropertyType::Apartment,
        usage: Usage::Residential,
        publication_type: PublicationType::Standard,
        address: Address {
            street: "Av. Boa Viagem".into(),
            number: Some("3000".into()),
            neighborhood: "Boa Viagem".into(),
            city: "Recife".into(),
            state: "PE".into(),
            zip_code: "51020-000".into(),
            ..Default::default()
        },
        sale_price: Some(Money::from_reais(950_000)),
        rental_price: None,
        condo_fee: Some(Money::from_reais(900)),
        property_tax: None,
        bedrooms: Some(3),
        suites: Some(1),
        bathrooms: Some(2),
        parking_spaces: Some(2),
        usable_area: Some(110.0),
        total_area: Some(130.0),
        floor: Some(15),
        amenities: vec!["POOL".into()],
        media: vec![],
    }
}

/// A stored-shape property ready to publish.
pub fn active_property(tenant_id: TenantId) -> Property {
    let mut p = Property::create(tenant_id, property_draft(), Utc::now()).expect("valid fixture");
    p.status = ListingStatus::Active;
    p
}

pub fn hourly_schedule(target: ScheduleTarget) -> ScheduleDraft {
    ScheduleDraft {
        name: "hourly bump".into(),
        time_slot: NaiveTime::from_hms_opt(9, 0, 0).expect("valid time"),
        utc_offset_minutes: 0,
        frequency: Frequency::EveryHours { hours: 1 },
        target,
        is_active: true,
    }
}
