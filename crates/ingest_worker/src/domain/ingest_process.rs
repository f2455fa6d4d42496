use crate::domain::{AggregateUpdater, BulkWriter, PurchaseNormalizer};
use common::domain::FeedSource;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// How the poll loop schedules cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// One cycle, then exit
    Once,
    /// Cycle, sleep for the poll interval, repeat until cancelled
    #[default]
    Continuous,
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "once" => Ok(RunMode::Once),
            "continuous" => Ok(RunMode::Continuous),
            other => Err(format!(
                "unknown run mode '{other}', expected 'once' or 'continuous'"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestProcessConfig {
    pub run_mode: RunMode,
    pub poll_interval: Duration,
    pub update_aggregates: bool,
    pub write_purchases: bool,
}

impl Default for IngestProcessConfig {
    fn default() -> Self {
        Self {
            run_mode: RunMode::Continuous,
            poll_interval: Duration::from_secs(120),
            update_aggregates: true,
            write_purchases: true,
        }
    }
}

/// Counts for one fetch-normalize-aggregate-write cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub fetch_failed: bool,
    pub events: usize,
    pub normalized: usize,
    pub rejected: usize,
    pub aggregates_applied: usize,
    pub aggregates_skipped: usize,
    pub aggregates_failed: usize,
    pub written: usize,
    pub write_failures: usize,
}

/// Counters accumulated across every cycle of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestTotals {
    pub cycles: u64,
    pub fetch_failures: u64,
    pub events: u64,
    pub normalized: u64,
    pub rejected: u64,
    pub aggregates_applied: u64,
    pub aggregates_skipped: u64,
    pub aggregates_failed: u64,
    pub written: u64,
    pub write_failures: u64,
}

impl IngestTotals {
    fn record(&mut self, cycle: &CycleSummary) {
        self.cycles += 1;
        self.fetch_failures += u64::from(cycle.fetch_failed);
        self.events += cycle.events as u64;
        self.normalized += cycle.normalized as u64;
        self.rejected += cycle.rejected as u64;
        self.aggregates_applied += cycle.aggregates_applied as u64;
        self.aggregates_skipped += cycle.aggregates_skipped as u64;
        self.aggregates_failed += cycle.aggregates_failed as u64;
        self.written += cycle.written as u64;
        self.write_failures += cycle.write_failures as u64;
    }
}

/// Poll loop driving fetch, normalize, aggregate and write on a schedule.
///
/// Every per-record and per-cycle failure is absorbed and counted; a cycle
/// always runs to completion. The sleep between cycles is the only point at
/// which cancellation is observed.
pub struct IngestProcess {
    feed: Arc<dyn FeedSource>,
    normalizer: PurchaseNormalizer,
    aggregate_updater: AggregateUpdater,
    bulk_writer: BulkWriter,
    config: IngestProcessConfig,
}

impl IngestProcess {
    pub fn new(
        feed: Arc<dyn FeedSource>,
        normalizer: PurchaseNormalizer,
        aggregate_updater: AggregateUpdater,
        bulk_writer: BulkWriter,
        config: IngestProcessConfig,
    ) -> Self {
        Self {
            feed,
            normalizer,
            aggregate_updater,
            bulk_writer,
            config,
        }
    }

    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> CycleSummary {
        let started = Instant::now();
        let mut summary = CycleSummary::default();

        let events = match self.feed.fetch().await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "feed fetch failed, treating cycle as empty");
                summary.fetch_failed = true;
                Vec::new()
            }
        };
        summary.events = events.len();

        let batch = self.normalizer.normalize_events(&events);
        summary.normalized = batch.purchases.len();
        summary.rejected = batch.rejected;

        if self.config.update_aggregates {
            let report = self.aggregate_updater.apply_batch(&batch.purchases).await;
            summary.aggregates_applied = report.applied;
            summary.aggregates_skipped = report.skipped;
            summary.aggregates_failed = report.failures.len();
        }

        if self.config.write_purchases {
            let result = self.bulk_writer.write(batch.purchases).await;
            summary.written = result.succeeded;
            summary.write_failures = result.failed.len();
        }

        info!(
            events = summary.events,
            normalized = summary.normalized,
            rejected = summary.rejected,
            aggregates_applied = summary.aggregates_applied,
            aggregates_skipped = summary.aggregates_skipped,
            aggregates_failed = summary.aggregates_failed,
            written = summary.written,
            write_failures = summary.write_failures,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ingest cycle complete"
        );

        summary
    }

    /// Run cycles per the configured mode until done or cancelled
    pub async fn run(&self, ctx: CancellationToken) -> IngestTotals {
        let mut totals = IngestTotals::default();
        debug!(mode = ?self.config.run_mode, "starting ingest process");

        loop {
            let summary = self.run_cycle().await;
            totals.record(&summary);

            if self.config.run_mode == RunMode::Once {
                break;
            }

            tokio::select! {
                _ = ctx.cancelled() => {
                    debug!("ingest process cancelled, shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!(
            cycles = totals.cycles,
            fetch_failures = totals.fetch_failures,
            normalized = totals.normalized,
            rejected = totals.rejected,
            aggregates_failed = totals.aggregates_failed,
            written = totals.written,
            write_failures = totals.write_failures,
            "ingest process stopped"
        );

        totals
    }
}
