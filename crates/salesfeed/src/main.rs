mod config;

use common::domain::PurchaseStore;
use common::elasticsearch::ElasticsearchClient;
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig, TelemetryProviders};
use crate::config::{ServiceConfig, StoreBackend};
use ingest_worker::domain::{InMemoryPurchaseStore, IngestProcessConfig};
use ingest_worker::elasticsearch::{ElasticsearchIndices, ElasticsearchPurchaseStore};
use ingest_worker::feed::HttpFeedConfig;
use ingest_worker::ingest_worker::{IngestWorker, IngestWorkerConfig};
use salesfeed_runner::Runner;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env().and_then(|cfg| cfg.validate().map(|_| cfg)) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize telemetry (tracing + OpenTelemetry for traces and logs)
    let mut telemetry_config =
        TelemetryConfig::new(config.otel_service_name.clone()).with_log_level(config.log_level.clone());
    if config.otel_enabled {
        telemetry_config = telemetry_config.with_otlp(config.otel_endpoint.clone());
    }
    let telemetry_providers: Option<TelemetryProviders> = match init_telemetry(&telemetry_config) {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        run_mode = ?config.run_mode,
        store_backend = ?config.store_backend,
        feed_url = %config.feed_url,
        otel_enabled = config.otel_enabled,
        "Starting salesfeed service"
    );
    debug!("Configuration: {:?}", redacted(&config));

    let store = match initialize_store(&config).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to initialize store: {:#}", e);
            shutdown_telemetry(telemetry_providers);
            std::process::exit(1);
        }
    };

    let worker = match IngestWorker::new(
        store,
        IngestWorkerConfig {
            feed: HttpFeedConfig {
                url: config.feed_url.clone(),
                start: config.feed_start,
                count: config.feed_count,
                timeout: Duration::from_secs(config.feed_timeout_secs),
            },
            seller_domain: config.seller_domain.clone(),
            process: IngestProcessConfig {
                run_mode: config.run_mode,
                poll_interval: Duration::from_secs(config.poll_interval_secs),
                update_aggregates: config.update_aggregates,
                write_purchases: config.write_purchases,
            },
        },
    ) {
        Ok(worker) => worker,
        Err(e) => {
            error!("Failed to initialize ingest worker: {:#}", e);
            shutdown_telemetry(telemetry_providers);
            std::process::exit(1);
        }
    };

    Runner::new()
        .with_named_process("ingest_worker", worker.into_runner_process())
        .with_closer(move || async move {
            info!("Running cleanup tasks...");
            // Flush pending traces and logs
            shutdown_telemetry(telemetry_providers);
            Ok(())
        })
        .with_closer_timeout(Duration::from_secs(config.closer_timeout_secs))
        .run_and_exit()
        .await;
}

async fn initialize_store(config: &ServiceConfig) -> anyhow::Result<Arc<dyn PurchaseStore>> {
    match config.store_backend {
        StoreBackend::Memory => {
            warn!("using in-memory store, nothing will be persisted");
            Ok(Arc::new(InMemoryPurchaseStore::new()))
        }
        StoreBackend::Elasticsearch => {
            let client = ElasticsearchClient::new(
                &config.es_url,
                config.es_api_key.clone(),
                Duration::from_secs(config.es_timeout_secs),
            )?;

            // Unreachable at startup is not fatal, each cycle reports its own store failures
            if let Err(e) = client.ping().await {
                warn!(es_url = %config.es_url, error = %e, "Elasticsearch not reachable yet");
            }

            let indices = ElasticsearchIndices {
                purchases: config.es_purchases_index.clone(),
                sellers: config.es_sellers_index.clone(),
                countries: config.es_countries_index.clone(),
            };
            info!(
                purchases = %indices.purchases,
                sellers = %indices.sellers,
                countries = %indices.countries,
                "using Elasticsearch store"
            );

            Ok(Arc::new(ElasticsearchPurchaseStore::new(
                Arc::new(client),
                indices,
                config.es_retry_on_conflict,
            )))
        }
    }
}

fn redacted(config: &ServiceConfig) -> ServiceConfig {
    let mut config = config.clone();
    if config.es_api_key.is_some() {
        config.es_api_key = Some("***".to_string());
    }
    config
}
