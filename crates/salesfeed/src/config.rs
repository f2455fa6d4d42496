use config::{Config, ConfigError, Environment};
use ingest_worker::domain::RunMode;
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Where purchases and aggregates are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Elasticsearch,
    /// Process-local store, nothing survives the run
    Memory,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // OpenTelemetry configuration
    #[serde(default)]
    pub otel_enabled: bool,

    /// OTLP gRPC collector endpoint
    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,

    // Feed configuration
    #[serde(default = "default_feed_url")]
    pub feed_url: String,

    /// Optional `start` query parameter
    #[serde(default)]
    pub feed_start: Option<u64>,

    /// Optional `count` query parameter
    #[serde(default)]
    pub feed_count: Option<u64>,

    #[serde(default = "default_feed_timeout_secs")]
    pub feed_timeout_secs: u64,

    /// Domain whose subdomains name the seller accounts
    #[serde(default = "default_seller_domain")]
    pub seller_domain: String,

    // Poll loop configuration
    #[serde(default = "default_run_mode")]
    pub run_mode: RunMode,

    /// Sleep between cycles in continuous mode
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_true")]
    pub update_aggregates: bool,

    #[serde(default = "default_true")]
    pub write_purchases: bool,

    // Store configuration
    #[serde(default = "default_store_backend")]
    pub store_backend: StoreBackend,

    #[serde(default = "default_es_url")]
    pub es_url: String,

    #[serde(default)]
    pub es_api_key: Option<String>,

    #[serde(default = "default_es_purchases_index")]
    pub es_purchases_index: String,

    #[serde(default = "default_es_sellers_index")]
    pub es_sellers_index: String,

    #[serde(default = "default_es_countries_index")]
    pub es_countries_index: String,

    #[serde(default = "default_es_timeout_secs")]
    pub es_timeout_secs: u64,

    /// Server-side retries of a conditional upsert that hit a version conflict
    #[serde(default = "default_es_retry_on_conflict")]
    pub es_retry_on_conflict: u32,

    /// Time allowed for cleanup on shutdown
    #[serde(default = "default_closer_timeout_secs")]
    pub closer_timeout_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_service_name() -> String {
    "salesfeed".to_string()
}

fn default_feed_url() -> String {
    "https://bandcamp.com/api/salesfeed/1/get".to_string()
}

fn default_feed_timeout_secs() -> u64 {
    10
}

fn default_seller_domain() -> String {
    "bandcamp.com".to_string()
}

fn default_run_mode() -> RunMode {
    RunMode::Continuous
}

fn default_poll_interval_secs() -> u64 {
    120
}

fn default_true() -> bool {
    true
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Elasticsearch
}

fn default_es_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_es_purchases_index() -> String {
    "purchases".to_string()
}

fn default_es_sellers_index() -> String {
    "seller_aggregates".to_string()
}

fn default_es_countries_index() -> String {
    "country_aggregates".to_string()
}

fn default_es_timeout_secs() -> u64 {
    30
}

fn default_es_retry_on_conflict() -> u32 {
    3
}

fn default_closer_timeout_secs() -> u64 {
    10
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("SALESFEED"))
            .build()?
            .try_deserialize()
    }

    /// Reject settings that would only fail later at runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.feed_url)
            .map_err(|e| invalid(format!("feed_url '{}': {e}", self.feed_url)))?;

        if self.seller_domain.trim().trim_start_matches('.').is_empty() {
            return Err(invalid("seller_domain must not be empty".to_string()));
        }

        if self.feed_timeout_secs == 0 {
            return Err(invalid("feed_timeout_secs must be positive".to_string()));
        }

        if self.run_mode == RunMode::Continuous && self.poll_interval_secs == 0 {
            return Err(invalid(
                "poll_interval_secs must be positive in continuous mode".to_string(),
            ));
        }

        if self.store_backend == StoreBackend::Elasticsearch {
            Url::parse(&self.es_url)
                .map_err(|e| invalid(format!("es_url '{}': {e}", self.es_url)))?;

            if self.es_timeout_secs == 0 {
                return Err(invalid("es_timeout_secs must be positive".to_string()));
            }

            for (name, index) in [
                ("es_purchases_index", &self.es_purchases_index),
                ("es_sellers_index", &self.es_sellers_index),
                ("es_countries_index", &self.es_countries_index),
            ] {
                if index.is_empty() {
                    return Err(invalid(format!("{name} must not be empty")));
                }
            }
        }

        Ok(())
    }
}

fn invalid(message: String) -> ConfigError {
    ConfigError::Message(format!("invalid configuration: {message}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-wide, so these tests run one at a time
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for (key, _) in std::env::vars() {
            if key.starts_with("SALESFEED_") {
                std::env::remove_var(key);
            }
        }
    }

    #[test]
    fn test_default_config() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear_env();

        let config = ServiceConfig::from_env().unwrap();

        assert_eq!(config.log_level, "info");
        assert_eq!(config.feed_url, "https://bandcamp.com/api/salesfeed/1/get");
        assert_eq!(config.feed_start, None);
        assert_eq!(config.run_mode, RunMode::Continuous);
        assert_eq!(config.poll_interval_secs, 120);
        assert!(config.update_aggregates);
        assert!(config.write_purchases);
        assert_eq!(config.store_backend, StoreBackend::Elasticsearch);
        assert_eq!(config.es_purchases_index, "purchases");
        assert_eq!(config.es_retry_on_conflict, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_custom_config() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear_env();

        std::env::set_var("SALESFEED_RUN_MODE", "once");
        std::env::set_var("SALESFEED_STORE_BACKEND", "memory");
        std::env::set_var("SALESFEED_FEED_START", "0");
        std::env::set_var("SALESFEED_FEED_COUNT", "50");
        std::env::set_var("SALESFEED_UPDATE_AGGREGATES", "false");
        std::env::set_var("SALESFEED_ES_API_KEY", "secret");

        let config = ServiceConfig::from_env().unwrap();

        assert_eq!(config.run_mode, RunMode::Once);
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.feed_start, Some(0));
        assert_eq!(config.feed_count, Some(50));
        assert!(!config.update_aggregates);
        assert_eq!(config.es_api_key.as_deref(), Some("secret"));

        clear_env();
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear_env();
        let base = ServiceConfig::from_env().unwrap();

        let mut config = base.clone();
        config.feed_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.poll_interval_secs = 0;
        assert!(config.validate().is_err());
        config.run_mode = RunMode::Once;
        assert!(config.validate().is_ok());

        let mut config = base.clone();
        config.es_sellers_index = String::new();
        assert!(config.validate().is_err());
        config.store_backend = StoreBackend::Memory;
        assert!(config.validate().is_ok());

        let mut config = base;
        config.seller_domain = " ".to_string();
        assert!(config.validate().is_err());
    }
}
