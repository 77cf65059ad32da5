//! Optional OTLP trace export, gated by the `OTEL_ENABLED` environment
//! variable the specification calls out but leaves external.
//!
//! Grounded on `vishalbelsare-agentgateway/crates/core/src/trcng.rs`'s
//! `init_tracer`: a batch OTLP exporter over gRPC, baggage + trace-context
//! propagation, and a `tracing_opentelemetry` layer so spans created through
//! `tracing` (the way every handler in this crate instruments itself) flow
//! to the collector without a second instrumentation surface. The endpoint
//! itself comes from the standard `OTEL_EXPORTER_OTLP_ENDPOINT` env var,
//! which `opentelemetry-otlp`'s exporter builder reads on its own.

use opentelemetry::global;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::SpanExporter;
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_sdk::propagation::TextMapCompositePropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Env var that gates OTLP export on and off. When unset or not `"true"`,
/// [`init`] is a no-op and the gateway runs with plain `tracing` output.
pub const OTEL_ENABLED_VAR: &str = "OTEL_ENABLED";

/// Initialize OTLP trace export if `OTEL_ENABLED=true`, and install the
/// `tracing-subscriber` pipeline either way (plain formatted logs, or logs
/// plus an OpenTelemetry layer). Returns the tracer provider so the caller
/// can shut it down (flushing buffered spans) before exit.
///
/// # Errors
///
/// Returns an error if the OTLP exporter cannot be built.
pub fn init(verbose: bool, json: bool) -> Result<Option<SdkTracerProvider>, String> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(if verbose { "debug" } else { "info" })
    });

    let enabled = std::env::var(OTEL_ENABLED_VAR).is_ok_and(|v| v == "true");
    if !enabled {
        let registry = tracing_subscriber::registry().with(filter);
        if json {
            registry.with(tracing_subscriber::fmt::layer().json()).init();
        } else {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }
        return Ok(None);
    }

    let propagator = TextMapCompositePropagator::new(vec![
        Box::new(BaggagePropagator::new()),
        Box::new(TraceContextPropagator::new()),
    ]);
    global::set_text_map_propagator(propagator);

    let exporter = SpanExporter::builder()
        .with_tonic()
        .build()
        .map_err(|e| format!("failed to build OTLP exporter: {e}"))?;

    let provider = SdkTracerProvider::builder()
        .with_resource(
            Resource::builder()
                .with_service_name("lgtm-query-gateway")
                .build(),
        )
        .with_batch_exporter(exporter)
        .build();
    global::set_tracer_provider(provider.clone());

    let otel_layer = tracing_opentelemetry::layer().with_tracer(provider.tracer("lgtm-query-gateway"));
    let registry = tracing_subscriber::registry().with(filter).with(otel_layer);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    info!("OTLP trace export enabled");
    Ok(Some(provider))
}
