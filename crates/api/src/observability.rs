//! Observability setup for the video pipeline API.
//!
//! Initializes tracing/logging/OTLP via the core crate, then wraps the
//! shared Prometheus registry in `actix-web-prom` middleware so HTTP
//! request metrics land alongside the domain counters in `/metrics`.

use actix_web_prom::{PrometheusMetrics, PrometheusMetricsBuilder};
use anyhow::Result;
use semantic_video_core::config::ObservabilityConfig;
use semantic_video_core::observability::{init_observability as init_tracing, registry};

pub fn init_observability(config: &ObservabilityConfig) -> Result<PrometheusMetrics> {
    init_tracing(config)?;

    PrometheusMetricsBuilder::new("video_pipeline_api")
        .endpoint("/metrics")
        .registry(registry())
        .exclude("/health/live")
        .exclude("/health/ready")
        .build()
        .map_err(|e| anyhow::anyhow!(e.to_string()))
}
