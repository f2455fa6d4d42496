use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a sold item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Track,
    Album,
    Merch,
    Bundle,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Track => "track",
            ItemType::Album => "album",
            ItemType::Merch => "merch",
            ItemType::Bundle => "bundle",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lookup from the feed's single-character item codes to item types
#[derive(Debug, Clone, Copy)]
pub struct ItemTypeTable {
    codes: &'static [(&'static str, ItemType)],
}

impl ItemTypeTable {
    pub const fn new(codes: &'static [(&'static str, ItemType)]) -> Self {
        Self { codes }
    }

    pub fn lookup(&self, code: &str) -> Option<ItemType> {
        self.codes
            .iter()
            .find(|(known, _)| *known == code)
            .map(|(_, item_type)| *item_type)
    }

    pub fn item_types(&self) -> impl Iterator<Item = ItemType> + '_ {
        self.codes.iter().map(|(_, item_type)| *item_type)
    }
}

/// Item codes used by the sales feed
pub const ITEM_TYPE_CODES: ItemTypeTable = ItemTypeTable::new(&[
    ("t", ItemType::Track),
    ("a", ItemType::Album),
    ("p", ItemType::Merch),
    ("b", ItemType::Bundle),
]);

/// UTC instant of a purchase, kept in the feed's fractional Unix seconds.
///
/// This is the natural identity of a purchase: two items with the same
/// event time are the same logical purchase for write purposes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventTime {
    unix_seconds: f64,
    utc: DateTime<Utc>,
}

impl EventTime {
    /// Returns None for negative, non-finite or out-of-range timestamps
    pub fn from_unix_seconds(unix_seconds: f64) -> Option<Self> {
        if !unix_seconds.is_finite() || unix_seconds < 0.0 {
            return None;
        }

        let whole = unix_seconds.trunc();
        let mut secs = whole as i64;
        let mut micros = ((unix_seconds - whole) * 1_000_000.0).round() as u32;
        if micros >= 1_000_000 {
            secs += 1;
            micros -= 1_000_000;
        }

        let utc = DateTime::from_timestamp(secs, micros * 1_000)?;
        Some(Self { unix_seconds, utc })
    }

    pub fn unix_seconds(&self) -> f64 {
        self.unix_seconds
    }

    pub fn utc(&self) -> DateTime<Utc> {
        self.utc
    }

    /// Deterministic identity key, the shortest decimal form of the raw timestamp
    pub fn key(&self) -> String {
        self.unix_seconds.to_string()
    }

    /// RFC3339 with microseconds, e.g. `2023-11-14T22:13:20.000000Z`
    pub fn rfc3339_micros(&self) -> String {
        self.utc.to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

/// Canonical, normalized purchase record
#[derive(Debug, Clone, PartialEq)]
pub struct Purchase {
    pub event_time: EventTime,
    pub seller_account: String,
    pub artist_name: Option<String>,
    pub item_title: String,
    pub item_type: ItemType,
    pub item_description: Option<String>,
    pub currency: String,
    pub list_price: Decimal,
    pub amount_paid: Decimal,
    pub amount_paid_usd: Decimal,
    pub buyer_country_name: Option<String>,
    pub buyer_country_code: String,
    pub url: String,
    pub art_url: Option<String>,
}

impl Purchase {
    pub fn key(&self) -> String {
        self.event_time.key()
    }
}

/// Stored shape of a purchase in the searchable store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseDocument {
    pub event_time: f64,
    pub timestamp: String,
    pub seller_account: String,
    pub artist_name: Option<String>,
    pub item_title: String,
    pub item_type: ItemType,
    pub item_description: Option<String>,
    pub currency: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub list_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount_paid: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount_paid_usd: Decimal,
    pub buyer_country_name: Option<String>,
    pub buyer_country_code: String,
    pub url: String,
    pub art_url: Option<String>,
}

impl From<&Purchase> for PurchaseDocument {
    fn from(purchase: &Purchase) -> Self {
        PurchaseDocument {
            event_time: purchase.event_time.unix_seconds(),
            timestamp: purchase.event_time.rfc3339_micros(),
            seller_account: purchase.seller_account.clone(),
            artist_name: purchase.artist_name.clone(),
            item_title: purchase.item_title.clone(),
            item_type: purchase.item_type,
            item_description: purchase.item_description.clone(),
            currency: purchase.currency.clone(),
            list_price: purchase.list_price,
            amount_paid: purchase.amount_paid,
            amount_paid_usd: purchase.amount_paid_usd,
            buyer_country_name: purchase.buyer_country_name.clone(),
            buyer_country_code: purchase.buyer_country_code.clone(),
            url: purchase.url.clone(),
            art_url: purchase.art_url.clone(),
        }
    }
}
