//! Log output and optional OTLP span export.

use anyhow::Result;
use opentelemetry::{global, trace::TracerProvider as _};
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing::{error, Subscriber};
use tracing_subscriber::{
    layer::SubscriberExt,
    registry::LookupSpan,
    EnvFilter,
    Layer,
};

use crate::{
    config::{ServerConfig, TelemetryConfig},
    metrics::service_resource,
};

// Transport crates log every frame at debug.
const DEFAULT_DIRECTIVES: &str = "info,h2=warn,hyper_util=warn,tower=warn";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event, for log shippers.
    Json,
    /// Single-line human readable output.
    Compact,
}

impl LogFormat {
    pub fn for_config(config: &ServerConfig) -> Self {
        if config.structured_logging() {
            LogFormat::Json
        } else {
            LogFormat::Compact
        }
    }

    fn layer<S>(self) -> Box<dyn Layer<S> + Send + Sync>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        match self {
            LogFormat::Json => Box::new(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_span_list(false)
                    .with_current_span(true),
            ),
            LogFormat::Compact => Box::new(tracing_subscriber::fmt::layer().compact()),
        }
    }
}

/// Filter built from `directives` (normally `RUST_LOG`), falling back to
/// [`DEFAULT_DIRECTIVES`] when unset or unparsable.
pub fn env_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVES))
}

fn rust_log_filter() -> EnvFilter {
    env_filter(std::env::var("RUST_LOG").ok().as_deref())
}

fn otlp_tracer_provider(
    telemetry: &TelemetryConfig,
    service_version: &str,
) -> Result<SdkTracerProvider> {
    let mut exporter = SpanExporter::builder().with_tonic();
    if let Some(endpoint) = &telemetry.endpoint {
        exporter = exporter.with_endpoint(endpoint.clone());
    }

    Ok(SdkTracerProvider::builder()
        .with_resource(service_resource(
            telemetry.instance_id.as_ref(),
            service_version,
        ))
        .with_batch_exporter(exporter.build()?)
        .build())
}

fn install<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        error!("logger was already initiated, continuing: {:?}", e);
    }
}

/// Installs the global subscriber. The returned provider must be flushed
/// before exit when span export is enabled.
pub fn setup_tracing(config: &ServerConfig) -> Result<Option<SdkTracerProvider>> {
    let log_layer = LogFormat::for_config(config)
        .layer()
        .with_filter(rust_log_filter());
    let registry = tracing_subscriber::registry().with(log_layer);

    if !config.telemetry.enable_tracing {
        install(registry);
        return Ok(None);
    }

    let tracer_provider = otlp_tracer_provider(&config.telemetry, env!("CARGO_PKG_VERSION"))?;
    global::set_tracer_provider(tracer_provider.clone());
    let otel_layer = tracing_opentelemetry::layer()
        .with_tracer(tracer_provider.tracer("content-relay"))
        .with_filter(rust_log_filter());
    install(registry.with(otel_layer));

    Ok(Some(tracer_provider))
}
