use common::domain::{
    AggregateContribution, AggregateError, AggregateSpace, ConditionalUpsertInput, Purchase,
    PurchaseStore, StoreError,
};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Result of a single aggregate update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOutcome {
    Applied,
    /// The purchase has no key in this space (empty buyer country code)
    Skipped,
}

/// Counts for one batch of aggregate updates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateReport {
    pub applied: usize,
    pub skipped: usize,
    pub failures: Vec<AggregateError>,
}

/// Domain service applying each purchase to the seller and country running totals.
///
/// Every update is a single store-evaluated accumulate-or-initialize call, so
/// concurrent workers never lose each other's contributions. Failures are
/// reported per key and never stop the rest of the batch.
pub struct AggregateUpdater {
    store: Arc<dyn PurchaseStore>,
}

impl AggregateUpdater {
    pub fn new(store: Arc<dyn PurchaseStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, purchase), fields(space = %space, key = %space.key_for(purchase)))]
    pub async fn apply(
        &self,
        space: AggregateSpace,
        purchase: &Purchase,
    ) -> Result<AggregateOutcome, AggregateError> {
        let key = space.key_for(purchase);
        if key.is_empty() {
            debug!(event_time = %purchase.key(), "no aggregate key, skipping update");
            return Ok(AggregateOutcome::Skipped);
        }

        let fail = |source: StoreError| AggregateError {
            space,
            key: key.to_string(),
            source,
        };

        let initial_document = space
            .seed_document(purchase)
            .map_err(|e| fail(e.into()))?;

        self.store
            .conditional_upsert(ConditionalUpsertInput {
                space,
                key: key.to_string(),
                initial_document,
                contribution: AggregateContribution::from_purchase(purchase),
            })
            .await
            .map_err(fail)?;

        Ok(AggregateOutcome::Applied)
    }

    /// Apply every purchase to both aggregate spaces
    pub async fn apply_batch(&self, purchases: &[Purchase]) -> AggregateReport {
        let mut report = AggregateReport::default();

        for purchase in purchases {
            for space in [AggregateSpace::Seller, AggregateSpace::Country] {
                match self.apply(space, purchase).await {
                    Ok(AggregateOutcome::Applied) => report.applied += 1,
                    Ok(AggregateOutcome::Skipped) => report.skipped += 1,
                    Err(e) => {
                        warn!(
                            space = %e.space,
                            key = %e.key,
                            event_time = %purchase.key(),
                            error = %e.source,
                            "aggregate update failed"
                        );
                        report.failures.push(e);
                    }
                }
            }
        }

        debug!(
            applied = report.applied,
            skipped = report.skipped,
            failed = report.failures.len(),
            "applied aggregate updates"
        );

        report
    }
}
