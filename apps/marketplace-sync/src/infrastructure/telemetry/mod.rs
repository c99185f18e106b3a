//! OpenTelemetry Tracing Integration
//!
//! Installs the `tracing` subscriber and, when enabled, an OTLP exporter for
//! distributed tracing.
//!
//! # Environment Variables
//!
//! - `OTEL_ENABLED`: Set to "true" to export spans (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: http://localhost:4317)
//! - `OTEL_SERVICE_NAME`: Service name for traces (default: marketplace-sync)
//! - `RUST_LOG`: Extra filter directives on top of `marketplace_sync=info`
//!
//! # Usage
//!
//! ```ignore
//! use marketplace_sync::infrastructure::telemetry;
//!
//! // Keep the guard alive until shutdown
//! let _guard = telemetry::init();
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Service name for OpenTelemetry traces.
const DEFAULT_SERVICE_NAME: &str = "marketplace-sync";

/// Default OTLP (gRPC) endpoint.
const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

/// Guard that shuts down OpenTelemetry when dropped.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Failed to shutdown OpenTelemetry tracer provider: {e}");
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Whether spans are exported over OTLP.
    pub enabled: bool,
    /// OTLP exporter endpoint.
    pub otlp_endpoint: String,
    /// Service name for traces.
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let enabled = lookup("OTEL_ENABLED").is_some_and(|v| v.eq_ignore_ascii_case("true"));

        let otlp_endpoint = lookup("OTEL_EXPORTER_OTLP_ENDPOINT")
            .unwrap_or_else(|| DEFAULT_OTLP_ENDPOINT.to_string());

        let service_name =
            lookup("OTEL_SERVICE_NAME").unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string());

        Self {
            enabled,
            otlp_endpoint,
            service_name,
        }
    }
}

/// Initialize telemetry with configuration from the environment.
///
/// Returns a guard that must be kept alive for the duration of the program.
#[must_use]
pub fn init() -> TelemetryGuard {
    init_with_config(TelemetryConfig::from_env())
}

/// Initialize telemetry with custom configuration.
///
/// Returns a guard that must be kept alive for the duration of the program.
#[must_use]
#[allow(clippy::expect_used)]
pub fn init_with_config(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::from_default_env()
        .add_directive(
            "marketplace_sync=info"
                .parse()
                .expect("static directive 'marketplace_sync=info' is valid"),
        )
        .add_directive(
            "hyper=warn"
                .parse()
                .expect("static directive 'hyper=warn' is valid"),
        )
        .add_directive(
            "tungstenite=warn"
                .parse()
                .expect("static directive 'tungstenite=warn' is valid"),
        );

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if !config.enabled {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();

        return TelemetryGuard {
            tracer_provider: None,
        };
    }

    let otlp_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()
        .expect("Failed to create OTLP exporter");

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(otlp_exporter)
        .with_resource(
            opentelemetry_sdk::Resource::builder()
                .with_service_name(config.service_name.clone())
                .build(),
        )
        .build();

    let tracer = tracer_provider.tracer(config.service_name);
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .init();

    TelemetryGuard {
        tracer_provider: Some(tracer_provider),
    }
}

// =============================================================================
// Tests
// =============================================================================
