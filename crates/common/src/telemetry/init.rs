use anyhow::{Context, Result};
use opentelemetry::{trace::TracerProvider, KeyValue};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, SpanExporter, WithExportConfig};
use opentelemetry_sdk::{
    logs::LoggerProvider,
    propagation::TraceContextPropagator,
    runtime,
    trace::{RandomIdGenerator, Sampler, TracerProvider as SdkTracerProvider},
    Resource,
};
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
use tracing::Subscriber;
use tracing_subscriber::{
    layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, EnvFilter, Layer,
};

use super::{TelemetryConfig, TelemetryProviders};

/// `RUST_LOG` wins over the configured level
fn env_filter(config: &TelemetryConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
}

/// JSON lines on stdout
fn stdout_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(false)
}

fn resource(config: &TelemetryConfig) -> Resource {
    Resource::new([
        KeyValue::new(SERVICE_NAME, config.service_name.clone()),
        KeyValue::new(SERVICE_VERSION, config.service_version.clone()),
    ])
}

fn otlp_providers(config: &TelemetryConfig) -> Result<TelemetryProviders> {
    let resource = resource(config);

    let span_exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otel_endpoint)
        .with_timeout(config.export_timeout)
        .build()
        .context("failed to build OTLP span exporter")?;
    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(span_exporter, runtime::Tokio)
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource.clone())
        .build();

    let log_exporter = LogExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otel_endpoint)
        .with_timeout(config.export_timeout)
        .build()
        .context("failed to build OTLP log exporter")?;
    let logger_provider = LoggerProvider::builder()
        .with_batch_exporter(log_exporter, runtime::Tokio)
        .with_resource(resource)
        .build();

    Ok(TelemetryProviders {
        tracer_provider,
        logger_provider,
    })
}

/// Install the global subscriber: JSON lines on stdout, plus OTLP export of
/// spans and log records when enabled.
///
/// Fails instead of panicking if a global subscriber is already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<Option<TelemetryProviders>> {
    if !config.otel_enabled {
        tracing_subscriber::registry()
            .with(env_filter(config))
            .with(stdout_layer())
            .try_init()
            .context("failed to install tracing subscriber")?;
        return Ok(None);
    }

    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());
    let providers = otlp_providers(config)?;

    let tracer = providers
        .tracer_provider
        .tracer(config.service_name.clone());

    // Span layer before the log bridge so log records carry the active trace context
    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .with(OpenTelemetryTracingBridge::new(&providers.logger_provider))
        .with(stdout_layer())
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(Some(providers))
}

/// Flush pending spans and log records, if OTLP export was enabled
pub fn shutdown_telemetry(providers: Option<TelemetryProviders>) {
    let Some(providers) = providers else {
        return;
    };
    for error in providers.shutdown() {
        eprintln!("telemetry shutdown error: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_names_service() {
        let resource = resource(&TelemetryConfig::new("salesfeed-test"));

        let name = resource.get(opentelemetry::Key::new(SERVICE_NAME));
        assert_eq!(name.map(|v| v.to_string()), Some("salesfeed-test".to_string()));
        assert!(resource
            .get(opentelemetry::Key::new(SERVICE_VERSION))
            .is_some());
    }

    #[test]
    fn test_second_init_is_an_error() {
        let config = TelemetryConfig::default();

        assert!(init_telemetry(&config).unwrap().is_none());
        assert!(init_telemetry(&config).is_err());
    }

    #[test]
    fn test_shutdown_without_providers_is_noop() {
        shutdown_telemetry(None);
    }
}
