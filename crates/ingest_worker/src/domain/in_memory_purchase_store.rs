use async_trait::async_trait;
use common::domain::{
    AggregateSpace, BulkItemFailure, BulkWriteInput, BulkWriteOutcome, ConditionalUpsertInput,
    CountryAggregate, PurchaseStore, SellerAggregate, StoreError, StoreResult, StoreSpace,
};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct State {
    documents: HashMap<StoreSpace, HashMap<String, serde_json::Value>>,
    sellers: HashMap<String, SellerAggregate>,
    countries: HashMap<String, CountryAggregate>,
}

/// Process-local store with the same keyed semantics as the search backend.
///
/// Every conditional upsert runs under one write lock, so concurrent updates
/// to the same key are applied one after the other.
#[derive(Default)]
pub struct InMemoryPurchaseStore {
    state: RwLock<State>,
    rejected_keys: HashSet<String>,
}

impl InMemoryPurchaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any write to `key` with a retriable status
    pub fn with_rejected_key(mut self, key: impl Into<String>) -> Self {
        self.rejected_keys.insert(key.into());
        self
    }

    pub async fn seller(&self, key: &str) -> Option<SellerAggregate> {
        self.state.read().await.sellers.get(key).cloned()
    }

    pub async fn country(&self, key: &str) -> Option<CountryAggregate> {
        self.state.read().await.countries.get(key).cloned()
    }

    pub async fn document(&self, space: StoreSpace, key: &str) -> Option<serde_json::Value> {
        let state = self.state.read().await;
        match space {
            StoreSpace::Purchases => state
                .documents
                .get(&space)
                .and_then(|docs| docs.get(key))
                .cloned(),
            StoreSpace::Sellers => state
                .sellers
                .get(key)
                .and_then(|agg| serde_json::to_value(agg).ok()),
            StoreSpace::Countries => state
                .countries
                .get(key)
                .and_then(|agg| serde_json::to_value(agg).ok()),
        }
    }

    pub async fn document_count(&self, space: StoreSpace) -> usize {
        let state = self.state.read().await;
        match space {
            StoreSpace::Purchases => state.documents.get(&space).map_or(0, HashMap::len),
            StoreSpace::Sellers => state.sellers.len(),
            StoreSpace::Countries => state.countries.len(),
        }
    }

    fn rejection(&self, key: &str) -> Option<StoreError> {
        self.rejected_keys
            .contains(key)
            .then(|| StoreError::Rejected {
                status: 503,
                reason: format!("write to {key} rejected"),
            })
    }
}

#[async_trait]
impl PurchaseStore for InMemoryPurchaseStore {
    async fn conditional_upsert(&self, input: ConditionalUpsertInput) -> StoreResult<()> {
        if let Some(err) = self.rejection(&input.key) {
            return Err(err);
        }

        let mut state = self.state.write().await;
        match input.space {
            AggregateSpace::Seller => match state.sellers.get_mut(&input.key) {
                Some(aggregate) => aggregate.accumulate(&input.contribution),
                None => {
                    let seed: SellerAggregate = serde_json::from_value(input.initial_document)?;
                    state.sellers.insert(input.key, seed);
                }
            },
            AggregateSpace::Country => match state.countries.get_mut(&input.key) {
                Some(aggregate) => aggregate.accumulate(&input.contribution),
                None => {
                    let seed: CountryAggregate = serde_json::from_value(input.initial_document)?;
                    state.countries.insert(input.key, seed);
                }
            },
        }

        Ok(())
    }

    async fn bulk_write(&self, input: BulkWriteInput) -> StoreResult<BulkWriteOutcome> {
        let mut outcome = BulkWriteOutcome::default();
        let mut state = self.state.write().await;
        let documents = state.documents.entry(input.space).or_default();

        for doc in input.documents {
            match self.rejection(&doc.key) {
                Some(error) => outcome.failures.push(BulkItemFailure {
                    key: doc.key,
                    error,
                }),
                None => {
                    documents.insert(doc.key, doc.document);
                    outcome.succeeded += 1;
                }
            }
        }

        debug!(
            space = ?input.space,
            succeeded = outcome.succeeded,
            failed = outcome.failures.len(),
            "in-memory bulk write"
        );

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{AggregateContribution, BulkDocument, EventTime, ItemType, Purchase};
    use rust_decimal::Decimal;
    use std::sync::Arc;

    fn purchase(seller: &str, country: &str, cents: i64) -> Purchase {
        Purchase {
            event_time: EventTime::from_unix_seconds(1700000000.0).unwrap(),
            seller_account: seller.to_string(),
            artist_name: None,
            item_title: "Title".to_string(),
            item_type: ItemType::Merch,
            item_description: None,
            currency: "USD".to_string(),
            list_price: Decimal::new(cents, 2),
            amount_paid: Decimal::new(cents, 2),
            amount_paid_usd: Decimal::new(cents, 2),
            buyer_country_name: Some("United States".to_string()),
            buyer_country_code: country.to_string(),
            url: format!("https://{}.bandcamp.com/merch/m", seller),
            art_url: None,
        }
    }

    fn upsert(space: AggregateSpace, p: &Purchase) -> ConditionalUpsertInput {
        ConditionalUpsertInput {
            space,
            key: space.key_for(p).to_string(),
            initial_document: space.seed_document(p).unwrap(),
            contribution: AggregateContribution::from_purchase(p),
        }
    }

    #[tokio::test]
    async fn test_upsert_seeds_then_accumulates() {
        let store = InMemoryPurchaseStore::new();

        store
            .conditional_upsert(upsert(AggregateSpace::Seller, &purchase("foo", "US", 1000)))
            .await
            .unwrap();
        store
            .conditional_upsert(upsert(AggregateSpace::Seller, &purchase("foo", "DE", 250)))
            .await
            .unwrap();

        let seller = store.seller("foo").await.unwrap();
        assert_eq!(seller.purchase_count, 2);
        assert_eq!(seller.total_revenue_usd, Decimal::new(1250, 2));
        assert_eq!(seller.countries_seen.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_upserts_lose_nothing() {
        let store = Arc::new(InMemoryPurchaseStore::new());

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .conditional_upsert(upsert(
                            AggregateSpace::Country,
                            &purchase("foo", "US", 199),
                        ))
                        .await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let country = store.country("US").await.unwrap();
        assert_eq!(country.purchase_count, 50);
        assert_eq!(country.revenue_usd, Decimal::new(9950, 2));
    }

    #[tokio::test]
    async fn test_bulk_write_overwrites_by_key() {
        let store = InMemoryPurchaseStore::new();
        let batch = |title: &str| BulkWriteInput {
            space: StoreSpace::Purchases,
            documents: vec![BulkDocument {
                key: "1700000000".to_string(),
                document: serde_json::json!({ "item_title": title }),
            }],
        };

        store.bulk_write(batch("a")).await.unwrap();
        store.bulk_write(batch("b")).await.unwrap();

        assert_eq!(store.document_count(StoreSpace::Purchases).await, 1);
        assert_eq!(
            store
                .document(StoreSpace::Purchases, "1700000000")
                .await
                .unwrap()["item_title"],
            "b"
        );
    }

    #[tokio::test]
    async fn test_rejected_key_fails_only_that_item() {
        let store = InMemoryPurchaseStore::new().with_rejected_key("2");
        let outcome = store
            .bulk_write(BulkWriteInput {
                space: StoreSpace::Purchases,
                documents: ["1", "2", "3"]
                    .iter()
                    .map(|key| BulkDocument {
                        key: key.to_string(),
                        document: serde_json::json!({}),
                    })
                    .collect(),
            })
            .await
            .unwrap();

        assert_eq!(outcome.succeeded, 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].key, "2");
        assert!(store.document(StoreSpace::Purchases, "2").await.is_none());
    }
}
