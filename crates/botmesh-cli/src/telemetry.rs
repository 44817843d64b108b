//! Tracing and OpenTelemetry pipeline initialisation.
//!
//! Call [`init_tracing`] once before building the Tokio runtime and hold
//! the returned guard for the whole process lifetime.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP collector base URL; enables the OTLP/HTTP span exporter when set. |
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `BOTMESH_LOG_FORMAT=json` | Emit newline-delimited JSON logs. |

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise the global `tracing` subscriber, optionally exporting spans
/// to an OTLP collector.
///
/// Uses the simple (synchronous) span exporter so no Tokio runtime needs
/// to exist at init time; the `botmesh` binary builds its runtime only
/// after calling this.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("BOTMESH_LOG_FORMAT").as_deref() == Ok("json");

    let provider = otlp_provider(service_name);
    let registry = tracing_subscriber::registry().with(env_filter);

    match (&provider, json) {
        (Some(p), true) => registry
            .with(tracing_opentelemetry::layer().with_tracer(p.tracer("botmesh")))
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        (Some(p), false) => registry
            .with(tracing_opentelemetry::layer().with_tracer(p.tracer("botmesh")))
            .with(tracing_subscriber::fmt::layer().compact())
            .init(),
        (None, true) => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        (None, false) => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .init(),
    }

    TracerProviderGuard(provider)
}

/// RAII guard that shuts the tracer provider down on drop, flushing any
/// pending span batches.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("[botmesh] OpenTelemetry provider shutdown error: {e}");
            }
        }
    }
}

/// Build the OTLP provider when `OTEL_EXPORTER_OTLP_ENDPOINT` is set;
/// otherwise plain console logging is used.
fn otlp_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[botmesh] OTLP exporter init failed: {e}"))
        .ok()?;

    Some(
        SdkTracerProvider::builder()
            .with_resource(
                Resource::builder()
                    .with_service_name(service_name.to_string())
                    .build(),
            )
            .with_simple_exporter(exporter)
            .build(),
    )
}
