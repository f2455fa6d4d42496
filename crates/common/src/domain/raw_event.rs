use serde::{Deserialize, Serialize};

/// One entry of the sales feed: an envelope bundling one or more line items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub event_type: Option<String>,
    pub items: Vec<RawItem>,
    /// Decode errors of items in this envelope that could not be read at all
    #[serde(skip)]
    pub undecodable: Vec<String>,
}

impl RawEvent {
    /// Wrap a bare item from a flat feed page into a single-item envelope
    pub fn single(item: RawItem) -> Self {
        Self {
            items: vec![item],
            ..Default::default()
        }
    }

    /// Envelope standing in for a feed entry that failed to decode
    pub fn undecodable(reason: impl Into<String>) -> Self {
        Self {
            undecodable: vec![reason.into()],
            ..Default::default()
        }
    }
}

/// A line item exactly as the feed reports it.
///
/// Every field is optional at parse time so one bad item never fails a whole
/// page; required fields are enforced during normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub utc_date: Option<f64>,
    pub artist_name: Option<String>,
    pub album_title: Option<String>,
    pub item_type: Option<String>,
    pub item_description: Option<String>,
    pub currency: Option<String>,
    pub item_price: Option<f64>,
    pub amount_paid: Option<f64>,
    pub amount_paid_usd: Option<f64>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub url: Option<String>,
    pub art_url: Option<String>,
}
