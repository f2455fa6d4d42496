use common::domain::{
    EventTime, ItemType, ItemTypeTable, NormalizeError, NormalizeResult, Purchase, RawEvent,
    RawItem,
};
use reqwest::Url;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;
use tracing::{debug, warn};

/// Purchases shaped from one feed page, plus the count of items that were skipped
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    pub purchases: Vec<Purchase>,
    pub rejected: usize,
}

/// Pure transformation of raw feed items into canonical purchases.
///
/// Rules:
/// - `event_time` keeps the raw Unix timestamp; the display timestamp is derived from it
/// - `seller_account` is the subdomain in front of the seller domain
/// - item codes are resolved through the injected lookup table, unknown codes are errors
/// - all three monetary fields are rounded half-to-even to 2 decimal places, negatives are errors
/// - the buyer country code is uppercased, a missing code stays empty
pub struct PurchaseNormalizer {
    seller_suffix: String,
    item_types: ItemTypeTable,
}

impl PurchaseNormalizer {
    pub fn new(seller_domain: &str, item_types: ItemTypeTable) -> Self {
        let domain = seller_domain.trim().trim_start_matches('.').to_ascii_lowercase();
        Self {
            seller_suffix: format!(".{domain}"),
            item_types,
        }
    }

    pub fn normalize(&self, item: &RawItem) -> NormalizeResult<Purchase> {
        let utc_date = item
            .utc_date
            .ok_or(NormalizeError::MissingField { field: "utc_date" })?;
        let event_time = EventTime::from_unix_seconds(utc_date)
            .ok_or(NormalizeError::InvalidTimestamp { value: utc_date })?;

        let raw_url = item
            .url
            .as_deref()
            .ok_or(NormalizeError::MissingField { field: "url" })?;
        let url = canonical_url(raw_url);
        let seller_account = self
            .seller_account(&url)
            .ok_or_else(|| NormalizeError::MalformedUrl {
                url: raw_url.to_string(),
            })?;

        let code = item
            .item_type
            .as_deref()
            .ok_or(NormalizeError::MissingField { field: "item_type" })?;
        let item_type = self.item_type(code)?;

        let currency = item
            .currency
            .clone()
            .ok_or(NormalizeError::MissingField { field: "currency" })?;

        let item_title = item
            .album_title
            .clone()
            .or_else(|| item.item_description.clone())
            .unwrap_or_default();

        Ok(Purchase {
            event_time,
            seller_account,
            artist_name: item.artist_name.clone(),
            item_title,
            item_type,
            item_description: item.item_description.clone(),
            currency,
            list_price: money("item_price", item.item_price)?,
            amount_paid: money("amount_paid", item.amount_paid)?,
            amount_paid_usd: money("amount_paid_usd", item.amount_paid_usd)?,
            buyer_country_name: item.country.clone(),
            buyer_country_code: item
                .country_code
                .as_deref()
                .unwrap_or_default()
                .to_uppercase(),
            url,
            art_url: item.art_url.clone(),
        })
    }

    /// Normalize every item of every envelope; failed items are logged and skipped
    pub fn normalize_events(&self, events: &[RawEvent]) -> NormalizedBatch {
        let mut batch = NormalizedBatch::default();

        for reason in events.iter().flat_map(|event| event.undecodable.iter()) {
            let e = NormalizeError::Undecodable {
                reason: reason.clone(),
            };
            warn!(error = %e, "skipping item that failed to decode");
            batch.rejected += 1;
        }

        for item in events.iter().flat_map(|event| event.items.iter()) {
            match self.normalize(item) {
                Ok(purchase) => batch.purchases.push(purchase),
                Err(e) => {
                    warn!(
                        error = %e,
                        utc_date = ?item.utc_date,
                        url = ?item.url,
                        item_type = ?item.item_type,
                        "skipping item that failed normalization"
                    );
                    batch.rejected += 1;
                }
            }
        }

        debug!(
            event_count = events.len(),
            purchase_count = batch.purchases.len(),
            rejected = batch.rejected,
            "normalized feed events"
        );

        batch
    }

    /// Single subdomain label directly in front of the seller domain
    fn seller_account(&self, url: &str) -> Option<String> {
        let parsed = Url::parse(url).ok()?;
        let account = parsed
            .host_str()?
            .strip_suffix(self.seller_suffix.as_str())?;

        if account.is_empty() || account.contains('.') {
            return None;
        }

        Some(account.to_string())
    }

    fn item_type(&self, code: &str) -> NormalizeResult<ItemType> {
        self.item_types
            .lookup(code)
            .ok_or_else(|| NormalizeError::UnknownItemType {
                code: code.to_string(),
            })
    }
}

/// Feed URLs are often protocol-relative (`//host/path`)
fn canonical_url(raw: &str) -> String {
    if raw.starts_with("//") {
        format!("https:{raw}")
    } else {
        raw.to_string()
    }
}

fn money(field: &'static str, value: Option<f64>) -> NormalizeResult<Decimal> {
    let value = value.ok_or(NormalizeError::MissingField { field })?;
    let invalid = || NormalizeError::InvalidAmount { field, value };

    // Revenue sums only ever grow
    if !value.is_finite() || value < 0.0 {
        return Err(invalid());
    }

    // Parse the shortest decimal form so 9.995 stays 9.995 instead of its binary neighbour
    let amount = Decimal::from_str(&value.to_string()).map_err(|_| invalid())?;
    Ok(amount.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven))
}
