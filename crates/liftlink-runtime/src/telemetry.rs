//! Tracing and OpenTelemetry initialisation.
//!
//! Call [`init_tracing`] once at process startup and keep the returned guard
//! alive until exit.
//!
//! | Variable | Effect |
//! |---|---|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP/HTTP collector base URL; enables span export. |
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `LIFTLINK_LOG_FORMAT=json` | Newline-delimited JSON logs instead of compact text. |

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Console log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    /// Read `LIFTLINK_LOG_FORMAT`; anything but `json` means compact.
    pub fn from_env() -> Self {
        Self::parse(std::env::var("LIFTLINK_LOG_FORMAT").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

/// Install the global subscriber: env filter, console formatter, and an OTLP
/// span exporter when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
///
/// A second call leaves the first subscriber in place.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let provider = build_provider(service_name);

    let otel = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("liftlink")));
    let (json, compact) = match LogFormat::from_env() {
        LogFormat::Json => (Some(tracing_subscriber::fmt::layer().json()), None),
        LogFormat::Compact => (None, Some(tracing_subscriber::fmt::layer().compact())),
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(otel)
        .with(json)
        .with(compact)
        .try_init();

    TracerProviderGuard(provider)
}

/// Shuts the tracer provider down on drop, flushing pending spans.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    pub fn exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("[liftlink] OpenTelemetry shutdown error: {e}");
            }
        }
    }
}

fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[liftlink] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    // Simple exporter: the CLI initialises tracing before its runtime exists.
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}
