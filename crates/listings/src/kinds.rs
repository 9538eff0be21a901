//! Listing classification enums.

use imobcrm_core::text_enum;

text_enum! {
    /// What the owner wants to do with the property.
    pub enum BusinessType {
        Sale => "sale",
        Rental => "rental",
        SaleAndRental => "sale_and_rental",
    }
}

impl BusinessType {
    pub fn is_for_sale(&self) -> bool {
        matches!(self, BusinessType::Sale | BusinessType::SaleAndRental)
    }

    pub fn is_for_rent(&self) -> bool {
        matches!(self, BusinessType::Rental | BusinessType::SaleAndRental)
    }
}

text_enum! {
    pub enum PropertyType {
        Apartment => "apartment",
        House => "house",
        CondoHouse => "condo_house",
        Penthouse => "penthouse",
        Flat => "flat",
        Studio => "studio",
        Land => "land",
        Farm => "farm",
        Office => "office",
        Store => "store",
        Warehouse => "warehouse",
        Building => "building",
    }
}

text_enum! {
    #[derive(Default)]
    pub enum Usage {
        #[default]
        Residential => "residential",
        Commercial => "commercial",
    }
}

text_enum! {
    /// Marketplace highlight tier.
    #[derive(Default)]
    pub enum PublicationType {
        #[default]
        Standard => "standard",
        Premium => "premium",
        SuperPremium => "super_premium",
        PremiereOne => "premiere_1",
        PremiereTwo => "premiere_2",
        Triple => "triple",
    }
}

text_enum! {
    /// Local lifecycle of a listing, independent of the marketplace.
    #[derive(Default)]
    pub enum ListingStatus {
        #[default]
        Draft => "draft",
        Active => "active",
        Inactive => "inactive",
        Sold => "sold",
        Rented => "rented",
    }
}

text_enum! {
    /// Marketplace synchronization state.
    #[derive(Default)]
    pub enum SyncStatus {
        #[default]
        NotSynced => "not_synced",
        Pending => "pending",
        Synced => "synced",
        /// Edited locally after the last successful sync.
        Outdated => "outdated",
        Failed => "failed",
    }
}
