use std::time::Duration;

use anyhow::Result;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{MetricExporter, WithExportConfig};
use opentelemetry_sdk::{
    metrics::{PeriodicReader, SdkMeterProvider},
    Resource,
};

/// Resource attributes shared by exported metrics and traces.
pub fn service_resource(instance_id: Option<&String>, service_version: &str) -> Resource {
    let mut resource_builder = Resource::builder()
        .with_attribute(KeyValue::new("service.namespace", "content-relay"))
        .with_attribute(KeyValue::new("service.name", "content-relay-server"))
        .with_attribute(KeyValue::new(
            "service.version",
            service_version.to_string(),
        ));

    if let Some(instance_id) = instance_id {
        resource_builder = resource_builder
            .with_attribute(KeyValue::new("service.instance.id", instance_id.to_owned()));
    }
    resource_builder.build()
}

pub fn init_provider(
    enable_metrics: bool,
    endpoint: Option<&String>,
    interval: Duration,
    instance_id: Option<&String>,
    service_version: &str,
) -> Result<Option<SdkMeterProvider>> {
    if !enable_metrics {
        return Ok(None);
    }

    let mut exporter = MetricExporter::builder().with_tonic();
    if let Some(endpoint) = endpoint {
        exporter = exporter.with_endpoint(endpoint.to_owned());
    }
    let exporter = exporter.build()?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(interval)
        .build();

    let provider = SdkMeterProvider::builder()
        .with_resource(service_resource(instance_id, service_version))
        .with_reader(reader)
        .build();

    opentelemetry::global::set_meter_provider(provider.clone());
    Ok(Some(provider))
}

pub mod relay_stats {
    use opentelemetry::metrics::Counter;

    #[derive(Debug)]
    pub struct Metrics {
        pub sessions_created: Counter<u64>,
        pub chunks_dispatched: Counter<u64>,
        pub bytes_dispatched: Counter<u64>,
        pub dispatch_errors: Counter<u64>,
        pub uploads_completed: Counter<u64>,
        pub uploads_failed: Counter<u64>,
        pub uploaded_bytes: Counter<u64>,
    }

    impl Default for Metrics {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Metrics {
        pub fn new() -> Metrics {
            let meter = opentelemetry::global::meter("content-relay");
            let sessions_created = meter
                .u64_counter("content_relay.sessions_created")
                .with_description("number of client sessions opened")
                .build();
            let chunks_dispatched = meter
                .u64_counter("content_relay.chunks_dispatched")
                .with_description("number of chunks written to client pipes")
                .build();
            let bytes_dispatched = meter
                .u64_counter("content_relay.bytes_dispatched")
                .with_description("uncompressed bytes written to client pipes")
                .build();
            let dispatch_errors = meter
                .u64_counter("content_relay.dispatch_errors")
                .with_description("number of chunks that could not be dispatched")
                .build();
            let uploads_completed = meter
                .u64_counter("content_relay.uploads_completed")
                .with_description("number of uploads that reached the sink")
                .build();
            let uploads_failed = meter
                .u64_counter("content_relay.uploads_failed")
                .with_description("number of failed uploads")
                .build();
            let uploaded_bytes = meter
                .u64_counter("content_relay.uploaded_bytes")
                .with_description("compressed bytes persisted by sinks")
                .build();
            Metrics {
                sessions_created,
                chunks_dispatched,
                bytes_dispatched,
                dispatch_errors,
                uploads_completed,
                uploads_failed,
                uploaded_bytes,
            }
        }
    }
}
