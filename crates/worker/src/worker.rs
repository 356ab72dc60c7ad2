//! The `AnalysisWorker` message loop (spec §4.3): pull from the queue,
//! claim exclusively against the job store, run the pipeline, ack/nak.
//! Bounded concurrency, graceful drain-on-shutdown, and DLQ redrive all
//! follow the same shape the platform's other queue-driven workers use.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use semantic_video_core::circuit_breaker::{CircuitBreaker, CircuitBreakerError, with_circuit_breaker};
use semantic_video_core::errors::JobStoreError;
use semantic_video_core::jobstore::JobStore;
use semantic_video_core::observability::{record_worker_job_outcome, set_worker_ready};
use semantic_video_core::queue::{MessageQueue, ReceivedMessage};
use tokio::sync::Semaphore;
use tracing::{Instrument, error, info, warn};

use crate::job::{PipelineContext, WorkerJobError, run_pipeline_with_deadline};

pub struct WorkerConfig {
    pub service_name: String,
    pub max_concurrent_jobs: usize,
    pub max_deliver: u64,
    pub job_deadline: Duration,
    /// Delay before a nak'd message becomes eligible for redelivery again.
    pub retry_backoff: Duration,
    /// Delay used when backpressure (all permits taken) forces a nak.
    pub backpressure_backoff: Duration,
    /// How often the DB-rescan reaper runs (spec §4.1 safety net).
    pub reaper_interval: Duration,
    /// A `quick_running`/`deep_running` claim older than this is considered
    /// abandoned by a crashed worker and is returned to `queued`.
    pub reaper_stale_after: chrono::Duration,
}

/// Shared handles every spawned job task needs.
#[derive(Clone)]
pub struct WorkerHandles {
    pub job_store: Arc<dyn JobStore>,
    pub pipeline: Arc<PipelineContext>,
    pub queue: Arc<dyn MessageQueue>,
    pub queue_circuit: Arc<CircuitBreaker>,
}

pub async fn run_worker(config: WorkerConfig, handles: WorkerHandles) -> anyhow::Result<()> {
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
    let shutdown = Arc::new(AtomicBool::new(false));
    let in_flight = Arc::new(AtomicUsize::new(0));

    set_worker_ready(&config.service_name, true);
    info!(
        max_concurrent_jobs = config.max_concurrent_jobs,
        "worker ready, polling for analysis jobs"
    );

    let reaper = tokio::spawn(reap_stale_claims_loop(
        handles.job_store.clone(),
        handles.queue.clone(),
        config.reaper_interval,
        config.reaper_stale_after,
        shutdown.clone(),
    ));

    let result = tokio::select! {
        result = process_messages(&config, &handles, semaphore, shutdown.clone(), in_flight.clone()) => {
            result
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received, draining in-flight jobs");
            shutdown.store(true, Ordering::SeqCst);
            drain(&in_flight, Duration::from_secs(300)).await;
            set_worker_ready(&config.service_name, false);
            info!("graceful shutdown complete");
            Ok(())
        }
    };

    reaper.abort();
    result
}

/// DB-rescan safety net (spec §4.1): periodically returns jobs stranded in
/// `quick_running`/`deep_running` back to `queued` and re-enqueues them, so
/// a worker that crashed before reaching `mark_failed` doesn't strand its
/// job forever. Runs independently of the message loop, since the jobs it
/// recovers are exactly the ones with no in-flight queue message left.
async fn reap_stale_claims_loop(
    job_store: Arc<dyn JobStore>,
    queue: Arc<dyn MessageQueue>,
    interval: Duration,
    stale_after: chrono::Duration,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        tokio::time::sleep(interval).await;
        if shutdown.load(Ordering::SeqCst) {
            return;
        }

        match job_store.reap_stale_claims(stale_after).await {
            Ok(reaped) if reaped.is_empty() => {}
            Ok(reaped) => {
                warn!(count = reaped.len(), "reaped stale claims, re-enqueuing");
                for job_id in reaped {
                    if let Err(e) = queue.enqueue(job_id).await {
                        error!(job_id = %job_id, error = %e, "failed to re-enqueue reaped job");
                    }
                }
            }
            Err(e) => error!(error = %e, "reap_stale_claims failed"),
        }
    }
}

async fn drain(in_flight: &AtomicUsize, timeout: Duration) {
    let start = std::time::Instant::now();
    while in_flight.load(Ordering::SeqCst) > 0 {
        let remaining = in_flight.load(Ordering::SeqCst);
        if start.elapsed() > timeout {
            warn!(remaining, "drain timeout reached, jobs still in flight");
            break;
        }
        info!(remaining, "waiting for in-flight jobs to complete");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

async fn process_messages(
    config: &WorkerConfig,
    handles: &WorkerHandles,
    semaphore: Arc<Semaphore>,
    shutdown: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
) -> anyhow::Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return Ok(());
        }

        let queue = handles.queue.clone();
        let receive = with_circuit_breaker(&handles.queue_circuit, || async move { queue.receive().await }).await;
        let message = match receive {
            Ok(Some(message)) => message,
            Ok(None) => continue, // poll timeout, nothing waiting
            Err(CircuitBreakerError::CircuitOpen(open)) => {
                warn!(error = %open, "queue circuit open, backing off");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                error!(error = %e, "queue receive failed, backing off");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                // At capacity: nak so another worker (or this one, later) can pick it up.
                if let Err(e) = handles.queue.nak(&message, config.backpressure_backoff).await {
                    error!(error = %e, job_id = %message.job_id, "failed to nak under backpressure");
                }
                continue;
            }
        };

        in_flight.fetch_add(1, Ordering::SeqCst);
        let handles = handles.clone();
        let max_deliver = config.max_deliver;
        let job_deadline = config.job_deadline;
        let retry_backoff = config.retry_backoff;
        let in_flight = in_flight.clone();

        let span = tracing::info_span!(
            "analysis_job",
            job_id = %message.job_id,
            delivery_count = message.delivery_count,
        );

        tokio::spawn(
            async move {
                handle_message(&handles, &message, max_deliver, job_deadline, retry_backoff).await;
                drop(permit);
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
            .instrument(span),
        );
    }
}

/// Claims the job, runs the pipeline, and resolves the queue message.
/// A claim miss (`Ok(None)`) means another worker already owns this job,
/// or the message is stale — either way the message is acked and dropped,
/// never retried, since retrying can't change the outcome of a claim.
async fn handle_message(
    handles: &WorkerHandles,
    message: &ReceivedMessage,
    max_deliver: u64,
    job_deadline: Duration,
    retry_backoff: Duration,
) {
    let job = match handles.job_store.claim_job(message.job_id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            info!(job_id = %message.job_id, "claim missed, job already dispatched elsewhere");
            let _ = handles.queue.ack(message).await;
            return;
        }
        Err(e) => {
            error!(job_id = %message.job_id, error = %e, "failed to claim job, will retry");
            let _ = handles.queue.nak(message, retry_backoff).await;
            return;
        }
    };

    let job_id = job.id;
    match run_pipeline_with_deadline(&handles.pipeline, job, job_deadline).await {
        Ok(()) => {
            if let Err(e) = handles.queue.ack(message).await {
                error!(job_id = %job_id, error = %e, "failed to ack completed job");
            }
        }
        Err(e) => {
            warn!(job_id = %job_id, error = %e, "pipeline failed");
            record_worker_job_outcome("pipeline", "failed");
            if let Err(mark_err) = handles.job_store.mark_failed(job_id, &e.to_string()).await {
                error!(job_id = %job_id, error = %mark_err, "failed to mark job failed");
            }
            resolve_after_failure(handles, message, max_deliver, retry_backoff, &e).await;
        }
    }
}

async fn resolve_after_failure(
    handles: &WorkerHandles,
    message: &ReceivedMessage,
    max_deliver: u64,
    retry_backoff: Duration,
    error: &WorkerJobError,
) {
    if message.delivery_count >= max_deliver {
        warn!(job_id = %message.job_id, delivery_count = message.delivery_count, "max redeliveries exhausted, dead-lettering");
        record_worker_job_outcome("pipeline", "dead_lettered");
        if let Err(e) = handles.queue.dead_letter(message).await {
            error!(job_id = %message.job_id, error = %e, "failed to dead-letter message");
        }
        return;
    }

    // A deadline blow-out or a store precondition failure means a retry
    // can't help; everything else (transient store/blob errors) is worth
    // another attempt within the redelivery budget.
    let retryable = !matches!(
        error,
        WorkerJobError::DeadlineExceeded | WorkerJobError::Store(JobStoreError::PreconditionFailed(_))
    );

    if retryable {
        if let Err(e) = handles.queue.nak(message, retry_backoff).await {
            error!(job_id = %message.job_id, error = %e, "failed to nak failed job");
        }
    } else if let Err(e) = handles.queue.dead_letter(message).await {
        error!(job_id = %message.job_id, error = %e, "failed to dead-letter non-retryable job");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
