//! Tracing subscriber initialization with structured logging and optional
//! OpenTelemetry trace export.
//!
//! # Usage
//!
//! ```no_run
//! use flowpoint_observe::tracing_setup::{init_tracing, shutdown_tracing, TracingOptions};
//!
//! init_tracing(TracingOptions::from_env()).unwrap();
//! // ... run the worker pool ...
//! shutdown_tracing();
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use std::sync::OnceLock;

/// Stores the OTel tracer provider so it can be shut down cleanly on exit.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

const PROVIDER_INSTALLED: &str = "OpenTelemetry tracer provider is already installed";

/// Filter used when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "info";

/// How the global subscriber is assembled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TracingOptions {
    /// Emit one JSON object per event instead of human-readable lines.
    pub json: bool,
    /// Bridge spans to OpenTelemetry through the stdout exporter.
    pub otel: bool,
}

impl TracingOptions {
    /// Read `FLOWPOINT_LOG_FORMAT` (`json` or `text`) and `FLOWPOINT_OTEL`.
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var("FLOWPOINT_LOG_FORMAT").ok().as_deref(),
            std::env::var("FLOWPOINT_OTEL").ok().as_deref(),
        )
    }

    fn from_vars(format: Option<&str>, otel: Option<&str>) -> Self {
        Self {
            json: format.is_some_and(|f| f.eq_ignore_ascii_case("json")),
            otel: otel.is_some_and(is_truthy),
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize the global tracing subscriber.
///
/// - Always installs a `fmt` layer with target visibility and span close
///   timing, as text or JSON depending on `options.json`.
/// - When `options.otel` is true, additionally bridges tracing spans to
///   OpenTelemetry using a stdout exporter.
/// - Respects `RUST_LOG`; defaults to `info`.
///
/// # Errors
///
/// Returns an error if the global subscriber or, with `otel`, the tracer
/// provider has already been installed.
pub fn init_tracing(options: TracingOptions) -> Result<(), Box<dyn std::error::Error>> {
    let otel_layer = if options.otel {
        if TRACER_PROVIDER.get().is_some() {
            return Err(PROVIDER_INSTALLED.into());
        }
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer("flowpoint");

        TRACER_PROVIDER
            .set(provider.clone())
            .map_err(|_| PROVIDER_INSTALLED)?;
        opentelemetry::global::set_tracer_provider(provider);

        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter())
        .with(otel_layer);

    if options.json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_span_events(FmtSpan::CLOSE);
        registry.with(fmt_layer).try_init()?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE);
        registry.with(fmt_layer).try_init()?;
    }

    Ok(())
}

/// Flush pending traces and shut down the OpenTelemetry tracer provider.
///
/// Safe to call even when OTel was not enabled (no-op in that case).
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("Warning: OTel tracer provider shutdown error: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_from_vars() {
        assert_eq!(TracingOptions::from_vars(None, None), TracingOptions::default());

        let opts = TracingOptions::from_vars(Some("JSON"), Some("true"));
        assert!(opts.json);
        assert!(opts.otel);

        let opts = TracingOptions::from_vars(Some("text"), Some("0"));
        assert!(!opts.json);
        assert!(!opts.otel);
    }

    #[test]
    fn init_twice_reports_error() {
        let options = TracingOptions {
            json: true,
            otel: false,
        };
        let _ = init_tracing(options);
        assert!(init_tracing(options).is_err());
        tracing::info!(flow_id = "flow-1", "subscriber installed");
        shutdown_tracing();
    }

    #[test]
    fn second_otel_install_is_reported() {
        let options = TracingOptions {
            json: false,
            otel: true,
        };
        // The first call may still fail on the global subscriber if another
        // test installed one; the provider is registered either way.
        let _ = init_tracing(options);

        let err = init_tracing(options).unwrap_err();
        assert!(err.to_string().contains("tracer provider is already installed"));
        shutdown_tracing();
    }
}
