//! Stderr logging and optional OTLP export of pipeline phase spans.

use anyhow::{Context, Result, anyhow};
use opentelemetry::trace::{TraceContextExt, Tracer, TracerProvider as _};
use opentelemetry::{Context as OtelContext, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider, SpanExporter};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const SERVICE_NAME: &str = "jvmflow";
const PHASE_ATTRIBUTE: &str = "jvmflow.phase";
const TRACES_PATH: &str = "/v1/traces";

/// OTLP tracer used for the `load`, `hierarchy`, `analysis`, `propagation` and `database` phases.
pub(crate) struct Telemetry {
    tracer: SdkTracer,
    provider: SdkTracerProvider,
}

impl Telemetry {
    /// Export to an OTLP/HTTP collector. A bare collector URL gets the traces path appended.
    pub(crate) fn new(endpoint: String) -> Result<Self> {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(trace_endpoint(&endpoint)?)
            .build()
            .context("build OTLP span exporter")?;
        Ok(Self::with_exporter(exporter))
    }

    fn with_exporter<E: SpanExporter + 'static>(exporter: E) -> Self {
        let provider = SdkTracerProvider::builder()
            .with_resource(Resource::builder().with_service_name(SERVICE_NAME).build())
            .with_batch_exporter(exporter)
            .build();
        opentelemetry::global::set_tracer_provider(provider.clone());
        Self {
            tracer: provider.tracer(SERVICE_NAME),
            provider,
        }
    }

    pub(crate) fn shutdown(&self) -> Result<()> {
        self.provider
            .shutdown()
            .map_err(|err| anyhow!("failed to flush phase spans: {err}"))
    }
}

fn trace_endpoint(endpoint: &str) -> Result<String> {
    let mut url = reqwest::Url::parse(endpoint)
        .with_context(|| format!("invalid OTLP endpoint {endpoint:?}"))?;
    if matches!(url.path(), "" | "/") {
        url.set_path(TRACES_PATH);
    }
    Ok(url.to_string())
}

/// Route `tracing` events to stderr; `RUST_LOG` overrides the default filter.
pub(crate) fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jvmflow=info,warn"));
    // A subscriber installed earlier (tests) wins.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Trace id of the active phase span, for correlating log lines with exported traces.
pub(crate) fn current_trace_id() -> Option<String> {
    let cx = OtelContext::current();
    let span_context = cx.span().span_context().clone();
    span_context
        .is_valid()
        .then(|| span_context.trace_id().to_string())
}

/// Run `f` as pipeline phase `phase`, exported as a span when telemetry is on.
pub(crate) fn in_phase<T, F>(
    telemetry: Option<&Telemetry>,
    phase: &'static str,
    attributes: &[KeyValue],
    f: F,
) -> T
where
    F: FnOnce() -> T,
{
    let Some(telemetry) = telemetry else {
        return f();
    };
    telemetry.tracer.in_span(phase, |cx| {
        let span = cx.span();
        span.set_attribute(KeyValue::new(PHASE_ATTRIBUTE, phase));
        for attribute in attributes {
            span.set_attribute(attribute.clone());
        }
        f()
    })
}
