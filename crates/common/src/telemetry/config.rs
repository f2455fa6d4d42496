use opentelemetry_sdk::{logs::LoggerProvider, trace::TracerProvider as SdkTracerProvider};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otel_enabled: bool,
    /// OTLP gRPC collector endpoint, used only when `otel_enabled`
    pub otel_endpoint: String,
    pub export_timeout: Duration,
}

impl TelemetryConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Export spans and log records to the given collector
    pub fn with_otlp(mut self, endpoint: impl Into<String>) -> Self {
        self.otel_enabled = true;
        self.otel_endpoint = endpoint.into();
        self
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "salesfeed".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            otel_enabled: false,
            otel_endpoint: "http://localhost:4317".to_string(),
            export_timeout: Duration::from_secs(5),
        }
    }
}

/// OTLP providers held until shutdown so buffered data can be flushed
pub struct TelemetryProviders {
    pub tracer_provider: SdkTracerProvider,
    pub logger_provider: LoggerProvider,
}

impl TelemetryProviders {
    /// Flush and stop both providers, reporting every failure
    pub fn shutdown(self) -> Vec<String> {
        let mut errors = Vec::new();
        if let Err(e) = self.tracer_provider.shutdown() {
            errors.push(format!("tracer provider: {e}"));
        }
        if let Err(e) = self.logger_provider.shutdown() {
            errors.push(format!("logger provider: {e}"));
        }
        errors
    }
}
