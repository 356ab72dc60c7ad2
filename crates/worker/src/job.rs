//! The `AnalysisWorker` pipeline for a single claimed job: download, quick
//! pass, deep pass, persist. Claiming and queue ack/nak live in `main.rs`
//! since they're about message lifecycle, not the analysis itself.

use std::sync::Arc;
use std::time::Duration;

use semantic_video_core::analysis::{Pass, compute_metrics, extract_pose};
use semantic_video_core::blob::BlobStore;
use semantic_video_core::circuit_breaker::{CircuitBreaker, CircuitBreakerError, with_circuit_breaker};
use semantic_video_core::errors::{BlobStoreError, JobStoreError};
use semantic_video_core::findings::{
    GuardrailViolation, assemble_report, check_persistence_guardrail, dispatch_findings, resolve_mode,
};
use semantic_video_core::jobstore::JobStore;
use semantic_video_core::models::{AnalysisJob, AnalysisMode};
use semantic_video_core::observability::{record_worker_job_duration, record_worker_job_outcome};
use semantic_video_core::retry::{blob_store_retry_policy, retry_with_policy};
use thiserror::Error;
use tracing::info;

/// Quick pass never samples above this rate; `compute_metrics` classifies
/// a pass as quick when `sample_fps <= 12`, so capping here keeps the
/// quick/deep split honest regardless of what the job requested.
const QUICK_SAMPLE_FPS_CAP: i32 = 12;

/// Floor for the deep pass's sample rate, for the same reason in reverse:
/// a job that requested a low `sample_fps` still gets a deep pass that
/// `compute_metrics` recognizes as deep.
const DEEP_SAMPLE_FPS_FLOOR: i32 = 24;

#[derive(Debug, Error)]
pub enum WorkerJobError {
    #[error("blob store error: {0}")]
    Blob(#[from] BlobStoreError),
    #[error("job store error: {0}")]
    Store(#[from] JobStoreError),
    #[error("persistence guardrail rejected {pass} artifacts: {source}")]
    Guardrail {
        pass: &'static str,
        #[source]
        source: GuardrailViolation,
    },
    #[error("job exceeded its processing deadline")]
    DeadlineExceeded,
}

/// The handful of adapters `run_pipeline` needs, bundled so the worker
/// loop in `main.rs` can pass one value instead of three.
pub struct PipelineContext {
    pub job_store: Arc<dyn JobStore>,
    pub blob_store: Arc<dyn BlobStore>,
    pub blob_circuit: Arc<CircuitBreaker>,
}

/// Runs both passes for a job that has already been claimed
/// (`quick_running`). Advances the job through
/// `quick_done -> deep_running -> done` as each pass's artifacts clear the
/// persistence guardrail (spec §4.4).
pub async fn run_pipeline(ctx: &PipelineContext, job: AnalysisJob) -> Result<(), WorkerJobError> {
    let session = ctx.job_store.get_session(job.session_id).await?;
    let analysis_mode = resolve_mode(job.analysis_mode, session.analysis_context.as_deref());

    let video_bytes = download_video(ctx, &job.s3_key).await?;

    info!(job_id = %job.id, mode = analysis_mode.as_str(), "starting quick pass");
    run_pass(ctx, &job, &video_bytes, analysis_mode, Pass::Quick).await?;

    let job = ctx.job_store.transition_to_deep_running(job.id).await?;

    info!(job_id = %job.id, mode = analysis_mode.as_str(), "starting deep pass");
    run_pass(ctx, &job, &video_bytes, analysis_mode, Pass::Deep).await?;

    Ok(())
}

async fn download_video(ctx: &PipelineContext, s3_key: &str) -> Result<Vec<u8>, WorkerJobError> {
    retry_with_policy(&blob_store_retry_policy(), "blob_store.get", || {
        let blob_store = ctx.blob_store.clone();
        let key = s3_key.to_string();
        let circuit = ctx.blob_circuit.clone();
        async move { with_circuit_breaker(&circuit, || async move { blob_store.get(&key).await }).await }
    })
    .await
    .map_err(|e| match e {
        CircuitBreakerError::CircuitOpen(open) => WorkerJobError::Blob(BlobStoreError::Transient(open.to_string())),
        CircuitBreakerError::OperationFailed(inner) => WorkerJobError::Blob(inner),
    })
}

async fn run_pass(
    ctx: &PipelineContext,
    job: &AnalysisJob,
    video_bytes: &[u8],
    analysis_mode: AnalysisMode,
    pass: Pass,
) -> Result<(), WorkerJobError> {
    let started = std::time::Instant::now();
    let sample_fps = sample_fps_for(pass, job.sample_fps);

    let pose = extract_pose(video_bytes, sample_fps, pass);
    let metrics = compute_metrics(pose, video_bytes, sample_fps);
    let findings = dispatch_findings(analysis_mode, &metrics);
    let report = assemble_report(analysis_mode, pass, &findings);

    if let Err(source) = check_persistence_guardrail(pass, Some(&findings), Some(&report)) {
        record_worker_job_outcome(pass.as_str(), "guardrail_rejected");
        return Err(WorkerJobError::Guardrail {
            pass: pass.as_str(),
            source,
        });
    }

    let raw_results = serde_json::json!({
        "pass": pass.as_str(),
        "sample_fps": sample_fps,
        "clip_duration_secs": metrics.clip_duration_secs,
        "frame_count": metrics.pose.frame_count,
        "reliability": metrics.pose.reliability,
        "ball_tracking_available": metrics.pose.ball_tracking_available,
        "values": metrics.values,
    });

    match pass {
        Pass::Quick => {
            ctx.job_store
                .persist_quick_and_advance(job.id, analysis_mode, raw_results, findings, report, None)
                .await?;
        }
        Pass::Deep => {
            ctx.job_store
                .persist_deep_and_complete(job.id, analysis_mode, raw_results, findings, report, None)
                .await?;
        }
    }

    record_worker_job_duration(pass.as_str(), started.elapsed().as_secs_f64());
    record_worker_job_outcome(pass.as_str(), "success");
    Ok(())
}

fn sample_fps_for(pass: Pass, requested: i32) -> i32 {
    match pass {
        Pass::Quick => requested.min(QUICK_SAMPLE_FPS_CAP).max(1),
        Pass::Deep => requested.max(DEEP_SAMPLE_FPS_FLOOR),
    }
}

/// Runs the pipeline under the configured per-job hard deadline (spec §5,
/// `WORKER_JOB_DEADLINE_SECONDS`). A job that blows through its deadline is
/// treated like any other failure: the caller marks it `failed` and leaves
/// it to the queue's redelivery/DLQ machinery.
pub async fn run_pipeline_with_deadline(
    ctx: &PipelineContext,
    job: AnalysisJob,
    deadline: Duration,
) -> Result<(), WorkerJobError> {
    match tokio::time::timeout(deadline, run_pipeline(ctx, job)).await {
        Ok(result) => result,
        Err(_) => Err(WorkerJobError::DeadlineExceeded),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quick_pass_never_exceeds_the_quick_cap() {
        assert_eq!(sample_fps_for(Pass::Quick, 60), QUICK_SAMPLE_FPS_CAP);
        assert_eq!(sample_fps_for(Pass::Quick, 1), 1);
    }

    #[test]
    fn deep_pass_never_drops_below_the_deep_floor() {
        assert_eq!(sample_fps_for(Pass::Deep, 1), DEEP_SAMPLE_FPS_FLOOR);
        assert_eq!(sample_fps_for(Pass::Deep, 60), 60);
    }
}
