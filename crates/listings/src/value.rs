//! Listing value objects.

use serde::{Deserialize, Serialize};

use imobcrm_core::{DomainError, DomainResult, ValueObject, text_enum};

// ─────────────────────────────────────────────────────────────────────────────
// Money
// ─────────────────────────────────────────────────────────────────────────────

/// An amount in Brazilian reais, stored in cents.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money {
    cents: i64,
}

impl ValueObject for Money {}

impl Money {
    pub const CURRENCY: &'static str = "BRL";

    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    pub fn from_reais(reais: i64) -> Self {
        Self { cents: reais * 100 }
    }

    pub fn cents(&self) -> i64 {
        self.cents
    }

    pub fn is_positive(&self) -> bool {
        self.cents > 0
    }

    /// Parse a decimal string such as `"1250000"`, `"1250000.5"` or `"99.90"`.
    pub fn parse_decimal(s: &str) -> DomainResult<Self> {
        let s = s.trim();
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };
        let invalid = || DomainError::validation(format!("invalid amount '{s}'"));
        if whole.is_empty() || frac.len() > 2 {
            return Err(invalid());
        }
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let whole: i64 = whole.parse().map_err(|_| invalid())?;
        let frac: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => frac.parse().map_err(|_| invalid())?,
        };
        let cents = whole
            .checked_mul(100)
            .and_then(|c| c.checked_add(frac))
            .ok_or_else(invalid)?;
        Ok(Self::from_cents(if negative { -cents } else { cents }))
    }

    /// Render as a plain decimal string with two fraction digits (`"99.90"`).
    pub fn to_decimal_string(&self) -> String {
        let sign = if self.cents < 0 { "-" } else { "" };
        let abs = self.cents.unsigned_abs();
        format!("{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", Self::CURRENCY, self.to_decimal_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Address
// ─────────────────────────────────────────────────────────────────────────────

/// Postal address of a property (Brazilian format).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub number: Option<String>,
    pub complement: Option<String>,
    pub neighborhood: String,
    pub city: String,
    /// Two-letter state code (UF).
    pub state: String,
    /// CEP, eight digits without punctuation.
    pub zip_code: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Whether the marketplace may show street and number.
    #[serde(default = "default_true")]
    pub show_full_address: bool,
}

fn default_true() -> bool {
    true
}

impl ValueObject for Address {}

/// Strip punctuation from a CEP and check it has exactly eight digits.
pub fn normalize_cep(raw: &str) -> DomainResult<String> {
    let digits: String = raw.chars().filter(|c| !matches!(c, '-' | '.' | ' ')).collect();
    if digits.len() != 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DomainError::validation(format!("invalid CEP '{raw}'")));
    }
    Ok(digits)
}

impl Address {
    /// Validate and normalize in place.
    pub fn normalized(mut self) -> DomainResult<Self> {
        self.street = self.street.trim().to_string();
        self.neighborhood = self.neighborhood.trim().to_string();
        self.city = self.city.trim().to_string();
        self.state = self.state.trim().to_uppercase();
        self.zip_code = normalize_cep(&self.zip_code)?;

        if self.city.is_empty() {
            return Err(DomainError::validation("city is required"));
        }
        if self.state.len() != 2 || !self.state.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DomainError::validation(format!("invalid state '{}'", self.state)));
        }
        if let Some(lat) = self.latitude {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(DomainError::validation("latitude out of range"));
            }
        }
        if let Some(lon) = self.longitude {
            if !(-180.0..=180.0).contains(&lon) {
                return Err(DomainError::validation("longitude out of range"));
            }
        }
        Ok(self)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Media
// ─────────────────────────────────────────────────────────────────────────────

text_enum! {
    #[derive(Default)]
    pub enum MediaKind {
        #[default]
        Image => "image",
        Video => "video",
        FloorPlan => "floor_plan",
    }
}

/// A photo, video or floor plan attached to a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    pub url: String,
    #[serde(default)]
    pub kind: MediaKind,
    #[serde(default)]
    pub caption: Option<String>,
    /// Display order, lowest first.
    #[serde(default)]
    pub position: u32,
}

impl ValueObject for MediaItem {}
