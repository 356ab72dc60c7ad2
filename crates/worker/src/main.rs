mod job;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use dotenvy::dotenv;
use semantic_video_core::blob::{BlobStore, S3BlobStore};
use semantic_video_core::circuit_breaker::CircuitBreaker;
use semantic_video_core::config::AppConfig;
use semantic_video_core::jobstore::{JobStore, PostgresJobStore};
use semantic_video_core::observability::init_observability;
use semantic_video_core::queue::{MessageQueue, NatsMessageQueue};
use tracing::info;

use crate::job::PipelineContext;
use crate::worker::{WorkerConfig, WorkerHandles, run_worker};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let config = AppConfig::from_env()?;
    init_observability(&config.observability)?;

    info!(
        health_check_port = config.worker_pool.health_check_port,
        "worker starting (liveness is inferred by the orchestrator from process health, not this port)"
    );

    let job_store: Arc<dyn JobStore> = Arc::new(PostgresJobStore::connect(&config.database).await?);

    let s3_client = S3BlobStore::initialize_client(&config.blob_store).await;
    let blob_store: Arc<dyn BlobStore> = Arc::new(S3BlobStore::new(s3_client, &config.blob_store));

    let message_queue: Arc<dyn MessageQueue> = Arc::new(NatsMessageQueue::connect(&config.queue).await?);

    let pipeline = Arc::new(PipelineContext {
        job_store: job_store.clone(),
        blob_store,
        blob_circuit: CircuitBreaker::for_blob_store(),
    });

    let handles = WorkerHandles {
        job_store,
        pipeline,
        queue: message_queue,
        queue_circuit: CircuitBreaker::for_queue(),
    };

    let worker_config = WorkerConfig {
        service_name: config.observability.service_name.clone(),
        max_concurrent_jobs: config.worker_pool.max_concurrent_jobs,
        max_deliver: config.queue.max_receive_count,
        job_deadline: Duration::from_secs(config.queue.job_deadline_secs),
        retry_backoff: Duration::from_secs(30),
        backpressure_backoff: Duration::from_secs(10),
        reaper_interval: Duration::from_secs(config.worker_pool.reaper_interval_secs),
        reaper_stale_after: chrono::Duration::seconds(config.worker_pool.reaper_stale_after_secs as i64),
    };

    info!("worker connected, entering message loop");
    run_worker(worker_config, handles).await
}
