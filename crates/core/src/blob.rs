//! BlobStore port (spec §2, §4.1): presigned PUT issuance, HEAD preflight,
//! and byte-stream GET/PUT/DELETE, abstracted behind a trait so the worker
//! and API can be exercised against an in-memory fake in tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::presigning::PresigningConfig;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::config::BlobStoreConfig;
use crate::errors::BlobStoreError;
use crate::observability::record_blob_store_operation;

/// Everything the core needs from an object store.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Issue a short-lived presigned PUT URL for `key`.
    async fn presigned_put_url(
        &self,
        key: &str,
        content_type: &str,
    ) -> Result<String, BlobStoreError>;

    /// Metadata-only existence check (spec: "Preflight (HEAD)").
    async fn head(&self, key: &str) -> Result<bool, BlobStoreError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobStoreError>;

    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str)
    -> Result<(), BlobStoreError>;

    async fn delete(&self, key: &str) -> Result<(), BlobStoreError>;
}

/// Production adapter over AWS S3 (or an S3-compatible store via
/// `AWS_ENDPOINT_URL`).
pub struct S3BlobStore {
    client: Client,
    bucket: String,
    presigned_url_ttl: Duration,
}

impl S3BlobStore {
    pub fn new(client: Client, config: &BlobStoreConfig) -> Self {
        Self {
            client,
            bucket: config.bucket.clone(),
            presigned_url_ttl: Duration::from_secs(config.presigned_url_ttl_secs),
        }
    }

    /// Build an S3 client from the shared AWS config, honoring an optional
    /// `AWS_ENDPOINT_URL` override for S3-compatible stores (MinIO, etc.).
    pub async fn initialize_client(config: &BlobStoreConfig) -> Client {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(config.region.clone()));
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let shared_config = loader.load().await;
        Client::new(&shared_config)
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[tracing::instrument(name = "blob_store.presigned_put_url", skip(self), fields(storage.system = "s3", key = %key))]
    async fn presigned_put_url(
        &self,
        key: &str,
        content_type: &str,
    ) -> Result<String, BlobStoreError> {
        let start = Instant::now();
        let presigning_config = PresigningConfig::expires_in(self.presigned_url_ttl)
            .map_err(|e| BlobStoreError::Other(anyhow::anyhow!(e)))?;

        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .presigned(presigning_config)
            .await;

        let duration = start.elapsed().as_secs_f64();
        record_blob_store_operation("presign", duration, result.is_ok());

        match result {
            Ok(presigned) => Ok(presigned.uri().to_string()),
            Err(e) => {
                error!(key = %key, error = %e, "failed to presign upload URL");
                Err(BlobStoreError::Transient(e.to_string()))
            }
        }
    }

    #[tracing::instrument(name = "blob_store.head", skip(self), fields(storage.system = "s3", key = %key))]
    async fn head(&self, key: &str) -> Result<bool, BlobStoreError> {
        let start = Instant::now();
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        let duration = start.elapsed().as_secs_f64();

        match result {
            Ok(_) => {
                record_blob_store_operation("head", duration, true);
                Ok(true)
            }
            Err(e) => {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    record_blob_store_operation("head", duration, true);
                    debug!(key = %key, "preflight HEAD found no object");
                    Ok(false)
                } else {
                    record_blob_store_operation("head", duration, false);
                    error!(key = %key, error = %e, "HEAD request failed");
                    Err(BlobStoreError::Transient(e.to_string()))
                }
            }
        }
    }

    #[tracing::instrument(name = "blob_store.get", skip(self), fields(storage.system = "s3", key = %key))]
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobStoreError> {
        let start = Instant::now();
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(resp) => {
                let data = resp
                    .body
                    .collect()
                    .await
                    .map_err(|e| BlobStoreError::Transient(e.to_string()))?;
                let bytes = data.into_bytes().to_vec();
                record_blob_store_operation("get", start.elapsed().as_secs_f64(), true);
                Ok(bytes)
            }
            Err(e) => {
                let duration = start.elapsed().as_secs_f64();
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    record_blob_store_operation("get", duration, true);
                    Err(BlobStoreError::NotFound(key.to_string()))
                } else {
                    record_blob_store_operation("get", duration, false);
                    error!(key = %key, error = %e, "GET request failed");
                    Err(BlobStoreError::Transient(e.to_string()))
                }
            }
        }
    }

    #[tracing::instrument(name = "blob_store.put", skip(self, body), fields(storage.system = "s3", key = %key, size = body.len()))]
    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), BlobStoreError> {
        let start = Instant::now();
        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body.into())
            .content_type(content_type)
            .send()
            .await;

        let duration = start.elapsed().as_secs_f64();
        record_blob_store_operation("put", duration, result.is_ok());
        result
            .map(|_| ())
            .map_err(|e| BlobStoreError::Transient(e.to_string()))
    }

    #[tracing::instrument(name = "blob_store.delete", skip(self), fields(storage.system = "s3", key = %key))]
    async fn delete(&self, key: &str) -> Result<(), BlobStoreError> {
        let start = Instant::now();
        let result = self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        let duration = start.elapsed().as_secs_f64();
        record_blob_store_operation("delete", duration, result.is_ok());
        result
            .map(|_| ())
            .map_err(|e| BlobStoreError::Transient(e.to_string()))
    }
}

/// In-memory fake used by unit and HTTP-integration tests (spec §10.5).
#[derive(Default)]
pub struct InMemoryBlobStore {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: simulate a client PUT landing at `key` out of band,
    /// i.e. without going through `put()`.
    pub async fn seed(&self, key: &str, body: Vec<u8>) {
        self.objects.lock().await.insert(key.to_string(), body);
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn presigned_put_url(
        &self,
        key: &str,
        _content_type: &str,
    ) -> Result<String, BlobStoreError> {
        Ok(format!("https://fake-blob-store.test/{key}"))
    }

    async fn head(&self, key: &str) -> Result<bool, BlobStoreError> {
        Ok(self.objects.lock().await.contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobStoreError> {
        self.objects
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| BlobStoreError::NotFound(key.to_string()))
    }

    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), BlobStoreError> {
        self.objects.lock().await.insert(key.to_string(), body);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BlobStoreError> {
        self.objects.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn head_reflects_seeded_objects_only() {
        let store = InMemoryBlobStore::new();
        assert!(!store.head("owner/session/job.mp4").await.unwrap());

        store.seed("owner/session/job.mp4", vec![1, 2, 3]).await;
        assert!(store.head("owner/session/job.mp4").await.unwrap());
    }

    #[tokio::test]
    async fn get_missing_key_errors_not_found() {
        let store = InMemoryBlobStore::new();
        let err = store.get("missing").await.unwrap_err();
        assert!(matches!(err, BlobStoreError::NotFound(_)));
    }
}
