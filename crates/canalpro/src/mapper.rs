//! Translation between local listings and the marketplace schema.

use imobcrm_core::{DomainError, DomainResult};
use imobcrm_listings::{
    Address, BusinessType, MediaItem, MediaKind, Money, Property, PropertyDraft, PropertyType,
    PublicationType, Usage,
};

use crate::{AddressInput, ImageInput, ListingInput, PricingInput, RemoteListing};

const SALE: &str = "SALE";
const RENTAL: &str = "RENTAL";

fn business_type_code(b: BusinessType) -> &'static str {
    match b {
        BusinessType::Sale => SALE,
        BusinessType::Rental => RENTAL,
        BusinessType::SaleAndRental => "SALE_RENTAL",
    }
}

fn business_type_from(code: &str) -> DomainResult<BusinessType> {
    match code {
        SALE => Ok(BusinessType::Sale),
        RENTAL => Ok(BusinessType::Rental),
        "SALE_RENTAL" => Ok(BusinessType::SaleAndRental),
        other => Err(DomainError::validation(format!("unknown business type '{other}'"))),
    }
}

const UNIT_TYPES: &[(PropertyType, &str)] = &[
    (PropertyType::Apartment, "APARTMENT"),
    (PropertyType::House, "HOME"),
    (PropertyType::CondoHouse, "CONDOMINIUM"),
    (PropertyType::Penthouse, "PENTHOUSE"),
    (PropertyType::Flat, "FLAT"),
    (PropertyType::Studio, "KITNET"),
    (PropertyType::Land, "RESIDENTIAL_ALLOTMENT_LAND"),
    (PropertyType::Farm, "FARM"),
    (PropertyType::Office, "OFFICE"),
    (PropertyType::Store, "BUSINESS"),
    (PropertyType::Warehouse, "SHED_DEPOSIT_WAREHOUSE"),
    (PropertyType::Building, "BUILDING"),
];

fn unit_type_code(t: PropertyType) -> &'static str {
    UNIT_TYPES
        .iter()
        .find(|(p, _)| *p == t)
        .map(|(_, code)| *code)
        .unwrap_or("APARTMENT")
}

fn unit_type_from(code: &str) -> DomainResult<PropertyType> {
    UNIT_TYPES
        .iter()
        .find(|(_, c)| *c == code)
        .map(|(p, _)| *p)
        .ok_or_else(|| DomainError::validation(format!("unknown unit type '{code}'")))
}

fn usage_code(u: Usage) -> &'static str {
    match u {
        Usage::Residential => "RESIDENTIAL",
        Usage::Commercial => "COMMERCIAL",
    }
}

fn usage_from(code: &str) -> DomainResult<Usage> {
    match code {
        "RESIDENTIAL" => Ok(Usage::Residential),
        "COMMERCIAL" => Ok(Usage::Commercial),
        other => Err(DomainError::validation(format!("unknown usage type '{other}'"))),
    }
}

/// Publication tiers use the local string form upper-cased.
fn publication_code(p: PublicationType) -> String {
    p.as_str().to_ascii_uppercase()
}

fn publication_from(code: &str) -> DomainResult<PublicationType> {
    code.to_ascii_lowercase().parse()
}

/// Build the marketplace payload for a local listing.
pub fn to_listing_input(p: &Property) -> ListingInput {
    let mut pricing_infos = Vec::new();
    let fees = |info: &mut PricingInput| {
        info.monthly_condo_fee = p.condo_fee.map(|m| m.to_decimal_string());
        info.yearly_iptu = p.property_tax.map(|m| m.to_decimal_string());
    };
    if let (true, Some(price)) = (p.business_type.is_for_sale(), p.sale_price) {
        let mut info = PricingInput {
            business_type: SALE.to_string(),
            price: price.to_decimal_string(),
            monthly_condo_fee: None,
            yearly_iptu: None,
        };
        fees(&mut info);
        pricing_infos.push(info);
    }
    if let (true, Some(price)) = (p.business_type.is_for_rent(), p.rental_price) {
        let mut info = PricingInput {
            business_type: RENTAL.to_string(),
            price: price.to_decimal_string(),
            monthly_condo_fee: None,
            yearly_iptu: None,
        };
        fees(&mut info);
        pricing_infos.push(info);
    }

    let image = |m: &MediaItem| ImageInput {
        url: m.url.clone(),
        caption: m.caption.clone(),
        order: m.position,
    };

    ListingInput {
        external_code: p.reference_code.clone(),
        title: p.title.clone(),
        description: p.description.clone(),
        business_type: business_type_code(p.business_type).to_string(),
        unit_type: unit_type_code(p.property_type).to_string(),
        usage_type: usage_code(p.usage).to_string(),
        publication_type: publication_code(p.publication_type),
        address: AddressInput {
            street: p.address.street.clone(),
            street_number: p.address.number.clone(),
            complement: p.address.complement.clone(),
            neighborhood: p.address.neighborhood.clone(),
            city: p.address.city.clone(),
            state: p.address.state.clone(),
            zip_code: p.address.zip_code.clone(),
            latitude: p.address.latitude,
            longitude: p.address.longitude,
            visibility: if p.address.show_full_address { "FULL" } else { "STREET" }.to_string(),
        },
        pricing_infos,
        bedrooms: p.bedrooms,
        suites: p.suites,
        bathrooms: p.bathrooms,
        parking_spaces: p.parking_spaces,
        usable_areas: p.usable_area,
        total_areas: p.total_area,
        floor: p.floor,
        amenities: p.amenities.clone(),
        images: p.media.iter().filter(|m| m.kind == MediaKind::Image).map(image).collect(),
        floor_plans: p
            .media
            .iter()
            .filter(|m| m.kind == MediaKind::FloorPlan)
            .map(image)
            .collect(),
        video_urls: p
            .media
            .iter()
            .filter(|m| m.kind == MediaKind::Video)
            .map(|m| m.url.clone())
            .collect(),
    }
}

fn parse_optional(amount: Option<&str>) -> DomainResult<Option<Money>> {
    amount.map(Money::parse_decimal).transpose()
}

/// Build a local draft from a marketplace listing.
///
/// Unknown enum codes are validation errors; the caller decides whether to skip.
pub fn from_remote_listing(remote: &RemoteListing) -> DomainResult<PropertyDraft> {
    let l = &remote.listing;
    let price_for = |kind: &str| l.pricing_infos.iter().find(|p| p.business_type == kind);

    let sale = price_for(SALE);
    let rental = price_for(RENTAL);
    let fees_from = sale.or(rental);

    let mut media: Vec<MediaItem> = Vec::new();
    for img in &l.images {
        media.push(MediaItem {
            url: img.url.clone(),
            kind: MediaKind::Image,
            caption: img.caption.clone(),
            position: img.order,
        });
    }
    for plan in &l.floor_plans {
        media.push(MediaItem {
            url: plan.url.clone(),
            kind: MediaKind::FloorPlan,
            caption: plan.caption.clone(),
            position: plan.order,
        });
    }
    for (i, url) in l.video_urls.iter().enumerate() {
        media.push(MediaItem {
            url: url.clone(),
            kind: MediaKind::Video,
            caption: None,
            position: i as u32,
        });
    }

    Ok(PropertyDraft {
        reference_code: l.external_code.clone(),
        title: l.title.clone(),
        description: l.description.clone(),
        business_type: business_type_from(&l.business_type)?,
        property_type: unit_type_from(&l.unit_type)?,
        usage: usage_from(&l.usage_type)?,
        publication_type: publication_from(&l.publication_type)?,
        address: Address {
            street: l.address.street.clone(),
            number: l.address.street_number.clone(),
            complement: l.address.complement.clone(),
            neighborhood: l.address.neighborhood.clone(),
            city: l.address.city.clone(),
            state: l.address.state.clone(),
            zip_code: l.address.zip_code.clone(),
            latitude: l.address.latitude,
            longitude: l.address.longitude,
            show_full_address: l.address.visibility != "STREET",
        },
        sale_price: parse_optional(sale.map(|p| p.price.as_str()))?,
        rental_price: parse_optional(rental.map(|p| p.price.as_str()))?,
        condo_fee: parse_optional(fees_from.and_then(|p| p.monthly_condo_fee.as_deref()))?,
        property_tax: parse_optional(fees_from.and_then(|p| p.yearly_iptu.as_deref()))?,
        bedrooms: l.bedrooms,
        suites: l.suites,
        bathrooms: l.bathrooms,
        parking_spaces: l.parking_spaces,
        usable_area: l.usable_areas,
        total_area: l.total_areas,
        floor: l.floor,
        amenities: l.amenities.clone(),
        media,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use imobcrm_core::TenantId;

    fn property() -> Property {
        let draft = PropertyDraft {
            reference_code: Some("CS-7".into()),
            title: "Casa com quintal".into(),
            description: "Ampla".into(),
            business_type: BusinessType::SaleAndRental,
            property_type: PropertyType::House,
            usage: Usage::Residential,
            publication_type: PublicationType::SuperPremium,
            address: Address {
                street: "Rua A".into(),
                number: Some("12".into()),
                neighborhood: "Centro".into(),
                city: "Campinas".into(),
                state: "SP".into(),
                zip_code: "13010-000".into(),
                show_full_address: false,
                ..Default::default()
            },
            sale_price: Some(Money::parse_decimal("650000.50").unwrap()),
            rental_price: Some(Money::from_reais(3_200)),
            condo_fee: None,
            property_tax: Some(Money::from_reais(1_800)),
            bedrooms: Some(3),
            suites: Some(1),
            bathrooms: Some(2),
            parking_spaces: Some(2),
            usable_area: Some(140.0),
            total_area: Some(300.0),
            floor: None,
            amenities: vec!["GARDEN".into()],
            media: vec![
                MediaItem {
                    url: "https://img/1.jpg".into(),
                    kind: MediaKind::Image,
                    caption: None,
                    position: 0,
                },
                MediaItem {
                    url: "https://img/plan.png".into(),
                    kind: MediaKind::FloorPlan,
                    caption: Some("térreo".into()),
                    position: 1,
                },
            ],
        };
        Property::create(TenantId::new(), draft, Utc::now()).unwrap()
    }

    #[test]
    fn builds_marketplace_payload() {
        let input = to_listing_input(&property());
        assert_eq!(input.business_type, "SALE_RENTAL");
        assert_eq!(input.unit_type, "HOME");
        assert_eq!(input.publication_type, "SUPER_PREMIUM");
        assert_eq!(input.address.visibility, "STREET");
        assert_eq!(input.pricing_infos.len(), 2);
        assert_eq!(input.pricing_infos[0].price, "650000.50");
        assert_eq!(input.pricing_infos[1].price, "3200.00");
        assert_eq!(input.pricing_infos[1].yearly_iptu.as_deref(), Some("1800.00"));
        assert_eq!(input.images.len(), 1);
        assert_eq!(input.floor_plans.len(), 1);
    }

    #[test]
    fn remote_listing_maps_back_to_equivalent_draft() {
        let p = property();
        let remote = RemoteListing {
            id: "L-1".into(),
            status: None,
            updated_at: None,
            listing: to_listing_input(&p),
        };
        let draft = from_remote_listing(&remote).unwrap().validate().unwrap();
        assert_eq!(draft, p.to_draft());
    }

    #[test]
    fn unknown_codes_are_rejected() {
        let mut remote = RemoteListing {
            id: "L-1".into(),
            status: None,
            updated_at: None,
            listing: to_listing_input(&property()),
        };
        remote.listing.unit_type = "CASTLE".into();
        assert!(matches!(from_remote_listing(&remote), Err(DomainError::Validation(_))));
    }
}
