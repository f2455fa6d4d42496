use common::domain::{
    BulkDocument, BulkWriteInput, Purchase, PurchaseDocument, PurchaseStore, StoreError,
    StoreSpace,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

/// Outcome of writing one batch of purchases
#[derive(Debug, Default)]
pub struct BulkResult {
    pub succeeded: usize,
    pub failed: Vec<(Purchase, StoreError)>,
}

/// Collapse purchases sharing an event time into one entry.
///
/// The last occurrence wins and takes the slot of the first, so the relative
/// order of distinct keys is preserved.
pub fn dedupe_by_event_time(purchases: Vec<Purchase>) -> Vec<Purchase> {
    let mut slots: HashMap<String, usize> = HashMap::with_capacity(purchases.len());
    let mut deduped: Vec<Purchase> = Vec::with_capacity(purchases.len());

    for purchase in purchases {
        match slots.get(&purchase.key()) {
            Some(&slot) => deduped[slot] = purchase,
            None => {
                slots.insert(purchase.key(), deduped.len());
                deduped.push(purchase);
            }
        }
    }

    deduped
}

/// Domain service writing purchase documents in a single keyed batch
pub struct BulkWriter {
    store: Arc<dyn PurchaseStore>,
}

impl BulkWriter {
    pub fn new(store: Arc<dyn PurchaseStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, purchases), fields(batch_size = purchases.len()))]
    pub async fn write(&self, purchases: Vec<Purchase>) -> BulkResult {
        let purchases = dedupe_by_event_time(purchases);
        if purchases.is_empty() {
            return BulkResult::default();
        }

        let mut documents = Vec::with_capacity(purchases.len());
        let mut failed = Vec::new();
        let mut pending = Vec::with_capacity(purchases.len());

        for purchase in purchases {
            match serde_json::to_value(PurchaseDocument::from(&purchase)) {
                Ok(document) => {
                    documents.push(BulkDocument {
                        key: purchase.key(),
                        document,
                    });
                    pending.push(purchase);
                }
                Err(e) => {
                    warn!(event_time = %purchase.key(), error = %e, "failed to serialize purchase");
                    failed.push((purchase, e.into()));
                }
            }
        }

        if documents.is_empty() {
            return BulkResult {
                succeeded: 0,
                failed,
            };
        }

        let outcome = match self
            .store
            .bulk_write(BulkWriteInput {
                space: StoreSpace::Purchases,
                documents,
            })
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, items = pending.len(), "bulk write request failed");
                failed.extend(pending.into_iter().map(|purchase| (purchase, e.clone())));
                return BulkResult {
                    succeeded: 0,
                    failed,
                };
            }
        };

        let mut errors: HashMap<String, StoreError> = outcome
            .failures
            .into_iter()
            .map(|failure| (failure.key, failure.error))
            .collect();

        for purchase in pending {
            if let Some(error) = errors.remove(&purchase.key()) {
                warn!(event_time = %purchase.key(), error = %error, "purchase write rejected");
                failed.push((purchase, error));
            }
        }

        debug!(
            succeeded = outcome.succeeded,
            failed = failed.len(),
            "bulk write completed"
        );

        BulkResult {
            succeeded: outcome.succeeded,
            failed,
        }
    }
}
