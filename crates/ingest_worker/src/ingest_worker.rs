use crate::domain::{
    AggregateUpdater, BulkWriter, IngestProcess, IngestProcessConfig, PurchaseNormalizer,
};
use crate::feed::{HttpFeedConfig, HttpFeedSource};
use common::domain::{FeedSource, PurchaseStore, ITEM_TYPE_CODES};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

type RunnerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Boxed process handed to the runner
pub type RunnerProcess = Box<dyn FnOnce(CancellationToken) -> RunnerFuture + Send>;

pub struct IngestWorkerConfig {
    pub feed: HttpFeedConfig,
    pub seller_domain: String,
    pub process: IngestProcessConfig,
}

/// Wires a feed source and a purchase store into a runnable ingest process
pub struct IngestWorker {
    process: IngestProcess,
}

impl IngestWorker {
    pub fn new(store: Arc<dyn PurchaseStore>, config: IngestWorkerConfig) -> anyhow::Result<Self> {
        let feed = Arc::new(HttpFeedSource::new(&config.feed)?);
        Ok(Self::with_feed(
            feed,
            store,
            &config.seller_domain,
            config.process,
        ))
    }

    pub fn with_feed(
        feed: Arc<dyn FeedSource>,
        store: Arc<dyn PurchaseStore>,
        seller_domain: &str,
        config: IngestProcessConfig,
    ) -> Self {
        debug!(seller_domain, "initializing ingest worker");
        let process = IngestProcess::new(
            feed,
            PurchaseNormalizer::new(seller_domain, ITEM_TYPE_CODES),
            AggregateUpdater::new(store.clone()),
            BulkWriter::new(store),
            config,
        );
        Self { process }
    }

    pub fn into_runner_process(self) -> RunnerProcess {
        let process = self.process;
        Box::new(move |ctx| -> RunnerFuture {
            Box::pin(async move {
                process.run(ctx).await;
                Ok(())
            })
        })
    }
}
