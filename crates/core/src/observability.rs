//! Structured logging, OpenTelemetry wiring, and Prometheus metrics
//! (spec §10.1). Dual-mode: stdout/JSON layers always run; an OTLP layer is
//! added only when `OTEL_EXPORTER_OTLP_ENDPOINT` is configured.

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Result;
use opentelemetry::{global, trace::TracerProvider};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, SpanExporter, WithExportConfig};
use opentelemetry_sdk::{
    Resource,
    logs::SdkLoggerProvider,
    propagation::TraceContextPropagator,
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
};
use prometheus::{CounterVec, HistogramVec, IntGaugeVec, Opts, Registry};
use tracing_subscriber::{
    EnvFilter, Layer, Registry as TracingRegistry, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::config::ObservabilityConfig;

static METRICS: OnceLock<Metrics> = OnceLock::new();

struct Metrics {
    registry: Registry,
    upload_initiate_total: CounterVec,
    upload_complete_total: CounterVec,
    preflight_total: CounterVec,
    queue_operations_total: CounterVec,
    blob_store_operations_total: CounterVec,
    worker_job_duration_seconds: HistogramVec,
    worker_job_outcome_total: CounterVec,
    circuit_breaker_transitions_total: CounterVec,
    export_requests_total: CounterVec,
    worker_ready: IntGaugeVec,
}

fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let registry = Registry::new();

        let upload_initiate_total = CounterVec::new(
            Opts::new(
                "video_pipeline_upload_initiate_total",
                "InitiateUpload calls by outcome",
            ),
            &["outcome"],
        )
        .expect("metric registration");
        let upload_complete_total = CounterVec::new(
            Opts::new(
                "video_pipeline_upload_complete_total",
                "CompleteUpload calls by outcome",
            ),
            &["outcome"],
        )
        .expect("metric registration");
        let preflight_total = CounterVec::new(
            Opts::new(
                "video_pipeline_preflight_total",
                "S3 preflight HEAD checks by outcome",
            ),
            &["outcome"],
        )
        .expect("metric registration");
        let queue_operations_total = CounterVec::new(
            Opts::new(
                "video_pipeline_queue_operations_total",
                "MessageQueue operations by kind and outcome",
            ),
            &["operation", "outcome"],
        )
        .expect("metric registration");
        let blob_store_operations_total = CounterVec::new(
            Opts::new(
                "video_pipeline_blob_store_operations_total",
                "BlobStore operations by kind and outcome",
            ),
            &["operation", "outcome"],
        )
        .expect("metric registration");
        let worker_job_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "video_pipeline_worker_job_duration_seconds",
                "Duration of a full worker job pipeline pass",
            ),
            &["pass"],
        )
        .expect("metric registration");
        let worker_job_outcome_total = CounterVec::new(
            Opts::new(
                "video_pipeline_worker_job_outcome_total",
                "Worker job outcomes by pass and result",
            ),
            &["pass", "outcome"],
        )
        .expect("metric registration");
        let circuit_breaker_transitions_total = CounterVec::new(
            Opts::new(
                "video_pipeline_circuit_breaker_transitions_total",
                "Circuit breaker state transitions",
            ),
            &["circuit", "to_state"],
        )
        .expect("metric registration");
        let export_requests_total = CounterVec::new(
            Opts::new(
                "video_pipeline_export_requests_total",
                "ExportGate requests by gating outcome (200 vs 409)",
            ),
            &["outcome"],
        )
        .expect("metric registration");
        let worker_ready = IntGaugeVec::new(
            Opts::new("video_pipeline_worker_ready", "Worker readiness gauge"),
            &["service"],
        )
        .expect("metric registration");

        registry
            .register(Box::new(upload_initiate_total.clone()))
            .ok();
        registry
            .register(Box::new(upload_complete_total.clone()))
            .ok();
        registry.register(Box::new(preflight_total.clone())).ok();
        registry
            .register(Box::new(queue_operations_total.clone()))
            .ok();
        registry
            .register(Box::new(blob_store_operations_total.clone()))
            .ok();
        registry
            .register(Box::new(worker_job_duration_seconds.clone()))
            .ok();
        registry
            .register(Box::new(worker_job_outcome_total.clone()))
            .ok();
        registry
            .register(Box::new(circuit_breaker_transitions_total.clone()))
            .ok();
        registry
            .register(Box::new(export_requests_total.clone()))
            .ok();
        registry.register(Box::new(worker_ready.clone())).ok();

        Metrics {
            registry,
            upload_initiate_total,
            upload_complete_total,
            preflight_total,
            queue_operations_total,
            blob_store_operations_total,
            worker_job_duration_seconds,
            worker_job_outcome_total,
            circuit_breaker_transitions_total,
            export_requests_total,
            worker_ready,
        }
    })
}

/// Registers the metrics on first use and returns the shared registry, for
/// `actix-web-prom` or a bare `/metrics` handler to scrape.
pub fn registry() -> Registry {
    metrics().registry.clone()
}

pub fn record_upload_initiate(outcome: &str) {
    metrics()
        .upload_initiate_total
        .with_label_values(&[outcome])
        .inc();
}

pub fn record_upload_complete(outcome: &str) {
    metrics()
        .upload_complete_total
        .with_label_values(&[outcome])
        .inc();
}

pub fn record_preflight(outcome: &str) {
    metrics().preflight_total.with_label_values(&[outcome]).inc();
}

pub fn record_queue_operation(operation: &str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics()
        .queue_operations_total
        .with_label_values(&[operation, outcome])
        .inc();
}

pub fn record_blob_store_operation(operation: &str, duration_secs: f64, success: bool) {
    let _ = duration_secs;
    let outcome = if success { "success" } else { "failure" };
    metrics()
        .blob_store_operations_total
        .with_label_values(&[operation, outcome])
        .inc();
}

pub fn record_worker_job_duration(pass: &str, duration_secs: f64) {
    metrics()
        .worker_job_duration_seconds
        .with_label_values(&[pass])
        .observe(duration_secs);
}

pub fn record_worker_job_outcome(pass: &str, outcome: &str) {
    metrics()
        .worker_job_outcome_total
        .with_label_values(&[pass, outcome])
        .inc();
}

pub fn record_circuit_breaker_transition(circuit: &str, to_state: &str) {
    metrics()
        .circuit_breaker_transitions_total
        .with_label_values(&[circuit, to_state])
        .inc();
}

pub fn record_export_request(outcome: &str) {
    metrics()
        .export_requests_total
        .with_label_values(&[outcome])
        .inc();
}

pub fn set_worker_ready(service_name: &str, ready: bool) {
    metrics()
        .worker_ready
        .with_label_values(&[service_name])
        .set(if ready { 1 } else { 0 });
}

/// Initialize tracing + OpenTelemetry for a binary (API or worker).
///
/// When `OTEL_EXPORTER_OTLP_ENDPOINT` is unset, only the stdout/JSON
/// layers are installed — no collector connection is attempted.
pub fn init_observability(config: &ObservabilityConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let use_json = config.log_format == crate::config::LogFormat::Json;
    let format_layer = if use_json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .with_target(true)
            .with_file(true)
            .flatten_event(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    let Some(otlp_endpoint) = &config.otlp_endpoint else {
        TracingRegistry::default()
            .with(env_filter)
            .with(format_layer)
            .try_init()?;
        return Ok(());
    };

    let resource = Resource::builder()
        .with_service_name(config.service_name.clone())
        .build();

    global::set_text_map_propagator(TraceContextPropagator::new());

    let trace_exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(otlp_endpoint)
        .with_timeout(Duration::from_secs(10))
        .build()?;
    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(trace_exporter)
        .with_resource(resource.clone())
        .with_id_generator(RandomIdGenerator::default())
        .with_sampler(Sampler::AlwaysOn)
        .build();
    global::set_tracer_provider(tracer_provider.clone());

    let log_exporter = LogExporter::builder()
        .with_tonic()
        .with_endpoint(otlp_endpoint)
        .with_timeout(Duration::from_secs(10))
        .build()?;
    let logger_provider = SdkLoggerProvider::builder()
        .with_batch_exporter(log_exporter)
        .with_resource(resource)
        .build();

    let tracer = tracer_provider.tracer(config.service_name.clone());
    let otel_trace_layer = tracing_opentelemetry::layer().with_tracer(tracer);
    let otel_log_layer = OpenTelemetryTracingBridge::new(&logger_provider);

    TracingRegistry::default()
        .with(env_filter)
        .with(format_layer)
        .with(otel_trace_layer)
        .with(otel_log_layer)
        .try_init()?;

    Ok(())
}
