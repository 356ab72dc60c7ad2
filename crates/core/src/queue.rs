//! MessageQueue port (spec §2, §4.3): enqueue, long-poll receive with
//! visibility timeout, delete-on-ack, DLQ redrive.
//!
//! The spec's vocabulary is SQS-flavored (`QUEUE_URL`, `maxReceiveCount`,
//! "visibility timeout"); this core backs the port with NATS JetStream,
//! which models the same contract as `ack_wait` (visibility timeout) and
//! `max_deliver` (max receive count). See DESIGN.md for the mapping.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::{
    self,
    consumer::pull::Config as PullConfig,
    consumer::{AckPolicy, Consumer},
    stream::{Config as StreamConfig, RetentionPolicy},
};
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::errors::QueueError;
use crate::models::AnalysisJobMessage;
use crate::observability::record_queue_operation;

pub const STREAM_NAME: &str = "ANALYSIS_JOBS";
pub const SUBJECT: &str = "jobs.analysis";
pub const CONSUMER_NAME: &str = "analysis-job-workers";
pub const DLQ_SUBJECT: &str = "dlq.analysis-jobs";

/// A message handed to the worker by `MessageQueue::receive`. Carries
/// enough to decide DLQ redrive and to ack/nak without re-touching the
/// underlying transport from outside this module.
pub struct ReceivedMessage {
    pub job_id: Uuid,
    pub delivery_count: u64,
    handle: MessageHandle,
}

enum MessageHandle {
    Nats(async_nats::jetstream::Message),
    Fake { payload: Vec<u8> },
}

/// Everything the worker needs from a durable job queue.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn enqueue(&self, job_id: Uuid) -> Result<(), QueueError>;

    /// Long-poll for at most one message, honoring the configured poll
    /// interval. Returns `None` on a poll timeout (not an error).
    async fn receive(&self) -> Result<Option<ReceivedMessage>, QueueError>;

    async fn ack(&self, message: &ReceivedMessage) -> Result<(), QueueError>;

    async fn nak(&self, message: &ReceivedMessage, delay: Duration) -> Result<(), QueueError>;

    /// Republish to the dead-letter subject and ack the original so it is
    /// removed from the main queue (spec §5 "Backpressure").
    async fn dead_letter(&self, message: &ReceivedMessage) -> Result<(), QueueError>;
}

/// Production adapter over NATS JetStream.
pub struct NatsMessageQueue {
    jetstream: jetstream::Context,
    consumer: Consumer<PullConfig>,
    poll_timeout: Duration,
    max_deliver: u64,
}

impl NatsMessageQueue {
    pub async fn connect(config: &QueueConfig) -> anyhow::Result<Self> {
        let client = async_nats::connect(&config.queue_url).await?;
        let jetstream = jetstream::new(client);

        let stream = ensure_stream(&jetstream).await?;
        let consumer = ensure_consumer(&stream, config).await?;

        Ok(Self {
            jetstream,
            consumer,
            poll_timeout: Duration::from_secs(config.poll_seconds),
            max_deliver: config.max_receive_count,
        })
    }
}

async fn ensure_stream(jetstream: &jetstream::Context) -> anyhow::Result<jetstream::stream::Stream> {
    let config = StreamConfig {
        name: STREAM_NAME.to_string(),
        subjects: vec![SUBJECT.to_string(), DLQ_SUBJECT.to_string()],
        retention: RetentionPolicy::WorkQueue,
        max_age: Duration::from_secs(14 * 24 * 60 * 60),
        num_replicas: 1,
        ..Default::default()
    };

    match jetstream.get_stream(STREAM_NAME).await {
        Ok(stream) => Ok(stream),
        Err(_) => {
            info!(stream = STREAM_NAME, "creating JetStream stream");
            Ok(jetstream.create_stream(config).await?)
        }
    }
}

async fn ensure_consumer(
    stream: &jetstream::stream::Stream,
    config: &QueueConfig,
) -> anyhow::Result<Consumer<PullConfig>> {
    let consumer_config = PullConfig {
        durable_name: Some(CONSUMER_NAME.to_string()),
        description: Some("Pulls analysis jobs for worker claim".to_string()),
        filter_subject: SUBJECT.to_string(),
        ack_policy: AckPolicy::Explicit,
        ack_wait: Duration::from_secs(config.visibility_timeout_secs),
        max_deliver: config.max_receive_count as i64,
        max_ack_pending: 1000,
        ..Default::default()
    };

    match stream.get_consumer(CONSUMER_NAME).await {
        Ok(consumer) => Ok(consumer),
        Err(_) => {
            info!(consumer = CONSUMER_NAME, "creating JetStream consumer");
            Ok(stream.create_consumer(consumer_config).await?)
        }
    }
}

#[async_trait]
impl MessageQueue for NatsMessageQueue {
    #[tracing::instrument(name = "queue.enqueue", skip(self), fields(job_id = %job_id))]
    async fn enqueue(&self, job_id: Uuid) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(&AnalysisJobMessage { job_id })
            .map_err(|e| QueueError::Other(e.into()))?;

        let result = self.jetstream.publish(SUBJECT, payload.into()).await;
        let ok = match result {
            Ok(ack) => ack.await.is_ok(),
            Err(_) => false,
        };
        record_queue_operation("enqueue", ok);
        if !ok {
            return Err(QueueError::Transient(
                "failed to publish to JetStream".to_string(),
            ));
        }
        Ok(())
    }

    #[tracing::instrument(name = "queue.receive", skip(self))]
    async fn receive(&self) -> Result<Option<ReceivedMessage>, QueueError> {
        let mut batch = self
            .consumer
            .fetch()
            .max_messages(1)
            .expires(self.poll_timeout)
            .messages()
            .await
            .map_err(|e| QueueError::Transient(e.to_string()))?;

        let Some(msg) = batch.next().await else {
            return Ok(None);
        };
        let msg = msg.map_err(|e| QueueError::Transient(e.to_string()))?;

        let delivery_count = msg.info().map(|info| info.delivered).unwrap_or(1);

        let parsed: AnalysisJobMessage = match serde_json::from_slice(&msg.payload) {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "undeserializable queue message, acking to drop it");
                let _ = msg.ack().await;
                return Ok(None);
            }
        };

        record_queue_operation("receive", true);
        Ok(Some(ReceivedMessage {
            job_id: parsed.job_id,
            delivery_count,
            handle: MessageHandle::Nats(msg),
        }))
    }

    #[tracing::instrument(name = "queue.ack", skip(self, message), fields(job_id = %message.job_id))]
    async fn ack(&self, message: &ReceivedMessage) -> Result<(), QueueError> {
        match &message.handle {
            MessageHandle::Nats(msg) => {
                msg.ack()
                    .await
                    .map_err(|e| QueueError::Transient(e.to_string()))?;
            }
            MessageHandle::Fake { .. } => {}
        }
        record_queue_operation("ack", true);
        Ok(())
    }

    #[tracing::instrument(name = "queue.nak", skip(self, message), fields(job_id = %message.job_id))]
    async fn nak(&self, message: &ReceivedMessage, delay: Duration) -> Result<(), QueueError> {
        match &message.handle {
            MessageHandle::Nats(msg) => {
                msg.ack_with(jetstream::AckKind::Nak(Some(delay)))
                    .await
                    .map_err(|e| QueueError::Transient(e.to_string()))?;
            }
            MessageHandle::Fake { .. } => {}
        }
        record_queue_operation("nak", true);
        Ok(())
    }

    #[tracing::instrument(name = "queue.dead_letter", skip(self, message), fields(job_id = %message.job_id))]
    async fn dead_letter(&self, message: &ReceivedMessage) -> Result<(), QueueError> {
        match &message.handle {
            MessageHandle::Nats(msg) => {
                let payload = msg.payload.clone();
                self.jetstream
                    .publish(DLQ_SUBJECT, payload)
                    .await
                    .map_err(|e| QueueError::Transient(e.to_string()))?;
                msg.ack()
                    .await
                    .map_err(|e| QueueError::Transient(e.to_string()))?;
            }
            MessageHandle::Fake { .. } => {}
        }
        warn!(job_id = %message.job_id, "message redirected to dead-letter queue");
        record_queue_operation("dlq", true);
        Ok(())
    }
}

/// In-memory fake used by unit and HTTP-integration tests (spec §10.5).
pub struct InMemoryMessageQueue {
    inner: Mutex<InMemoryQueueState>,
}

struct InMemoryQueueState {
    main: VecDeque<(Uuid, u64)>,
    dlq: Vec<Uuid>,
    enqueue_count: usize,
}

impl InMemoryMessageQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(InMemoryQueueState {
                main: VecDeque::new(),
                dlq: Vec::new(),
                enqueue_count: 0,
            }),
        })
    }

    /// Test helper: total number of successful `enqueue` calls (testable
    /// property #2 — idempotency of CompleteUpload).
    pub async fn enqueue_count(&self) -> usize {
        self.inner.lock().await.enqueue_count
    }

    pub async fn dlq_len(&self) -> usize {
        self.inner.lock().await.dlq.len()
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn enqueue(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut state = self.inner.lock().await;
        state.main.push_back((job_id, 1));
        state.enqueue_count += 1;
        Ok(())
    }

    async fn receive(&self) -> Result<Option<ReceivedMessage>, QueueError> {
        let mut state = self.inner.lock().await;
        Ok(state.main.pop_front().map(|(job_id, delivery_count)| {
            ReceivedMessage {
                job_id,
                delivery_count,
                handle: MessageHandle::Fake { payload: vec![] },
            }
        }))
    }

    async fn ack(&self, _message: &ReceivedMessage) -> Result<(), QueueError> {
        Ok(())
    }

    async fn nak(&self, message: &ReceivedMessage, _delay: Duration) -> Result<(), QueueError> {
        let mut state = self.inner.lock().await;
        state
            .main
            .push_back((message.job_id, message.delivery_count + 1));
        Ok(())
    }

    async fn dead_letter(&self, message: &ReceivedMessage) -> Result<(), QueueError> {
        let mut state = self.inner.lock().await;
        state.dlq.push(message.job_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_then_receive_round_trips_job_id() {
        let queue = InMemoryMessageQueue::new();
        let job_id = Uuid::new_v4();
        queue.enqueue(job_id).await.unwrap();

        let received = queue.receive().await.unwrap().unwrap();
        assert_eq!(received.job_id, job_id);
        assert_eq!(received.delivery_count, 1);
    }

    #[tokio::test]
    async fn nak_redelivers_with_incremented_delivery_count() {
        let queue = InMemoryMessageQueue::new();
        let job_id = Uuid::new_v4();
        queue.enqueue(job_id).await.unwrap();

        let first = queue.receive().await.unwrap().unwrap();
        queue.nak(&first, Duration::from_secs(1)).await.unwrap();

        let second = queue.receive().await.unwrap().unwrap();
        assert_eq!(second.delivery_count, 2);
    }

    #[tokio::test]
    async fn dead_letter_is_tracked_separately_from_main_queue() {
        let queue = InMemoryMessageQueue::new();
        let job_id = Uuid::new_v4();
        queue.enqueue(job_id).await.unwrap();
        let msg = queue.receive().await.unwrap().unwrap();

        queue.dead_letter(&msg).await.unwrap();
        assert_eq!(queue.dlq_len().await, 1);
        assert!(queue.receive().await.unwrap().is_none());
    }
}
