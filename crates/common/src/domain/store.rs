use crate::domain::{AggregateContribution, AggregateSpace, StoreError, StoreResult, StoreSpace};
use async_trait::async_trait;

/// Input for a single accumulate-or-initialize aggregate update
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalUpsertInput {
    pub space: AggregateSpace,
    pub key: String,
    /// Stored as-is when no document exists for the key
    pub initial_document: serde_json::Value,
    /// Applied by the store to an existing document
    pub contribution: AggregateContribution,
}

/// A keyed document for a batch write
#[derive(Debug, Clone, PartialEq)]
pub struct BulkDocument {
    pub key: String,
    pub document: serde_json::Value,
}

/// Input for a batch write (overwrite-by-key)
#[derive(Debug, Clone, PartialEq)]
pub struct BulkWriteInput {
    pub space: StoreSpace,
    pub documents: Vec<BulkDocument>,
}

/// A batch item the store did not persist
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItemFailure {
    pub key: String,
    pub error: StoreError,
}

/// Per-item outcome of a batch request that reached the store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkWriteOutcome {
    pub succeeded: usize,
    pub failures: Vec<BulkItemFailure>,
}

/// Store capability used by the ingestion pipeline
///
/// Implementations must:
/// - Evaluate `conditional_upsert` atomically on the store side in one round trip,
///   never as a client-side read-modify-write
/// - Treat `bulk_write` keys as document identities, overwriting on repeat
/// - Report individual item failures in the outcome instead of failing the batch
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PurchaseStore: Send + Sync {
    /// Create the aggregate from `initial_document` if absent, otherwise apply `contribution`
    async fn conditional_upsert(&self, input: ConditionalUpsertInput) -> StoreResult<()>;

    /// Write all documents in one batch request
    ///
    /// # Returns
    /// Per-item outcome, or StoreError if the request as a whole failed
    async fn bulk_write(&self, input: BulkWriteInput) -> StoreResult<BulkWriteOutcome>;
}
