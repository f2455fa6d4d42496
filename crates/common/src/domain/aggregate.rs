use crate::domain::Purchase;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Aggregate key spaces maintained alongside the purchase index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateSpace {
    Seller,
    Country,
}

impl AggregateSpace {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateSpace::Seller => "seller",
            AggregateSpace::Country => "country",
        }
    }

    /// Key of the aggregate document a purchase contributes to
    pub fn key_for<'a>(&self, purchase: &'a Purchase) -> &'a str {
        match self {
            AggregateSpace::Seller => &purchase.seller_account,
            AggregateSpace::Country => &purchase.buyer_country_code,
        }
    }

    /// Initial aggregate document for a key seen for the first time
    pub fn seed_document(&self, purchase: &Purchase) -> serde_json::Result<serde_json::Value> {
        match self {
            AggregateSpace::Seller => serde_json::to_value(SellerAggregate::seed(purchase)),
            AggregateSpace::Country => serde_json::to_value(CountryAggregate::seed(purchase)),
        }
    }
}

impl fmt::Display for AggregateSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document spaces of the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreSpace {
    Purchases,
    Sellers,
    Countries,
}

impl From<AggregateSpace> for StoreSpace {
    fn from(space: AggregateSpace) -> Self {
        match space {
            AggregateSpace::Seller => StoreSpace::Sellers,
            AggregateSpace::Country => StoreSpace::Countries,
        }
    }
}

/// Additive contribution of one purchase to an existing aggregate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateContribution {
    pub purchase_count: u64,
    pub revenue_usd: Decimal,
    /// Only present for non-empty buyer country codes
    pub country_code: Option<String>,
}

impl AggregateContribution {
    pub fn from_purchase(purchase: &Purchase) -> Self {
        let country_code = if purchase.buyer_country_code.is_empty() {
            None
        } else {
            Some(purchase.buyer_country_code.clone())
        };

        Self {
            purchase_count: 1,
            revenue_usd: purchase.amount_paid_usd,
            country_code,
        }
    }
}

fn add_revenue(total: Decimal, amount: Decimal) -> Decimal {
    (total + amount).round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}

/// Running totals for one seller account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellerAggregate {
    pub seller_account: String,
    pub purchase_count: u64,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_revenue_usd: Decimal,
    pub countries_seen: BTreeSet<String>,
}

impl SellerAggregate {
    pub fn seed(purchase: &Purchase) -> Self {
        let mut aggregate = Self {
            seller_account: purchase.seller_account.clone(),
            purchase_count: 0,
            total_revenue_usd: Decimal::ZERO,
            countries_seen: BTreeSet::new(),
        };
        aggregate.accumulate(&AggregateContribution::from_purchase(purchase));
        aggregate
    }

    /// Counters only grow; the country set never shrinks or duplicates
    pub fn accumulate(&mut self, contribution: &AggregateContribution) {
        self.purchase_count += contribution.purchase_count;
        self.total_revenue_usd = add_revenue(self.total_revenue_usd, contribution.revenue_usd);
        if let Some(code) = &contribution.country_code {
            self.countries_seen.insert(code.clone());
        }
    }
}

/// Running totals for one buyer country
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryAggregate {
    pub country_code: String,
    pub country_name: Option<String>,
    pub purchase_count: u64,
    #[serde(with = "rust_decimal::serde::float")]
    pub revenue_usd: Decimal,
}

impl CountryAggregate {
    pub fn seed(purchase: &Purchase) -> Self {
        let mut aggregate = Self {
            country_code: purchase.buyer_country_code.clone(),
            country_name: purchase.buyer_country_name.clone(),
            purchase_count: 0,
            revenue_usd: Decimal::ZERO,
        };
        aggregate.accumulate(&AggregateContribution::from_purchase(purchase));
        aggregate
    }

    pub fn accumulate(&mut self, contribution: &AggregateContribution) {
        self.purchase_count += contribution.purchase_count;
        self.revenue_usd = add_revenue(self.revenue_usd, contribution.revenue_usd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventTime, ItemType};

    fn purchase(seller: &str, country: &str, usd: Decimal) -> Purchase {
        Purchase {
            event_time: EventTime::from_unix_seconds(1700000000.0).unwrap(),
            seller_account: seller.to_string(),
            artist_name: None,
            item_title: "Title".to_string(),
            item_type: ItemType::Track,
            item_description: None,
            currency: "USD".to_string(),
            list_price: usd,
            amount_paid: usd,
            amount_paid_usd: usd,
            buyer_country_name: None,
            buyer_country_code: country.to_string(),
            url: format!("https://{}.bandcamp.com/track/t", seller),
            art_url: None,
        }
    }

    #[test]
    fn test_seller_seed_carries_first_contribution() {
        let aggregate = SellerAggregate::seed(&purchase("foo", "US", Decimal::new(500, 2)));

        assert_eq!(aggregate.seller_account, "foo");
        assert_eq!(aggregate.purchase_count, 1);
        assert_eq!(aggregate.total_revenue_usd, Decimal::new(500, 2));
        assert_eq!(aggregate.countries_seen.len(), 1);
        assert!(aggregate.countries_seen.contains("US"));
    }

    #[test]
    fn test_seller_countries_never_duplicate() {
        let mut aggregate = SellerAggregate::seed(&purchase("foo", "US", Decimal::ONE));
        aggregate.accumulate(&AggregateContribution::from_purchase(&purchase(
            "foo",
            "US",
            Decimal::ONE,
        )));
        aggregate.accumulate(&AggregateContribution::from_purchase(&purchase(
            "foo",
            "DE",
            Decimal::ONE,
        )));

        assert_eq!(aggregate.purchase_count, 3);
        assert_eq!(aggregate.total_revenue_usd, Decimal::new(3, 0));
        assert_eq!(
            aggregate.countries_seen.iter().cloned().collect::<Vec<_>>(),
            vec!["DE".to_string(), "US".to_string()]
        );
    }

    #[test]
    fn test_empty_country_not_added_to_seller() {
        let aggregate = SellerAggregate::seed(&purchase("foo", "", Decimal::ONE));
        assert!(aggregate.countries_seen.is_empty());
    }

    #[test]
    fn test_country_accumulates_revenue() {
        let mut aggregate = CountryAggregate::seed(&purchase("foo", "GB", Decimal::new(199, 2)));
        aggregate.accumulate(&AggregateContribution::from_purchase(&purchase(
            "bar",
            "GB",
            Decimal::new(801, 2),
        )));

        assert_eq!(aggregate.purchase_count, 2);
        assert_eq!(aggregate.revenue_usd, Decimal::new(1000, 2));
    }

    #[test]
    fn test_seed_document_shape() {
        let p = purchase("foo", "US", Decimal::new(1000, 2));
        let seller = AggregateSpace::Seller.seed_document(&p).unwrap();
        let country = AggregateSpace::Country.seed_document(&p).unwrap();

        assert_eq!(seller["purchase_count"], 1);
        assert_eq!(seller["total_revenue_usd"], serde_json::json!(10.0));
        assert_eq!(seller["countries_seen"], serde_json::json!(["US"]));
        assert_eq!(country["country_code"], "US");
        assert_eq!(country["revenue_usd"], serde_json::json!(10.0));
    }

    #[test]
    fn test_key_for_space() {
        let p = purchase("foo", "US", Decimal::ONE);
        assert_eq!(AggregateSpace::Seller.key_for(&p), "foo");
        assert_eq!(AggregateSpace::Country.key_for(&p), "US");
        assert_eq!(StoreSpace::from(AggregateSpace::Country), StoreSpace::Countries);
    }
}
