//! Centralized configuration management.
//!
//! All configuration is loaded from environment variables at startup.
//! This provides a single source of truth and fails fast if required config is missing.

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub blob_store: BlobStoreConfig,
    pub server: ServerConfig,
    pub observability: ObservabilityConfig,
    pub worker_pool: WorkerPoolConfig,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

/// MessageQueue port configuration, backed by NATS JetStream.
///
/// Field names follow the spec's SQS-flavored vocabulary
/// (`queue_url`, `max_receive_count`) even though the backing transport is
/// JetStream; see DESIGN.md for the mapping onto `ack_wait`/`max_deliver`.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// NATS server URL (the spec's `QUEUE_URL`)
    pub queue_url: String,
    pub poll_seconds: u64,
    pub visibility_timeout_secs: u64,
    pub job_deadline_secs: u64,
    pub max_receive_count: u64,
}

/// BlobStore port configuration, backed by S3 or an S3-compatible store.
#[derive(Debug, Clone)]
pub struct BlobStoreConfig {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint_url: Option<String>,
    pub bucket: String,
    pub presigned_url_ttl_secs: u64,
    pub max_download_size_bytes: i64,
    pub max_upload_size_bytes: i64,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub hostname: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
    pub shutdown_timeout_secs: Option<u64>,
}

/// Observability configuration
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub service_name: String,
    pub otlp_endpoint: Option<String>,
    pub log_format: LogFormat,
}

/// Log format type
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Worker pool sizing, health endpoint, and DB-rescan reaper configuration
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub max_concurrent_jobs: usize,
    pub health_check_port: u16,
    /// How often the reaper rescans for stale `quick_running`/`deep_running`
    /// claims (spec §4.1 DB-rescan safety net).
    pub reaper_interval_secs: u64,
    /// A claim older than this is considered abandoned by a crashed worker.
    pub reaper_stale_after_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// This should be called once at application startup.
    /// It will fail fast if required configuration is missing.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database: DatabaseConfig::from_env()?,
            queue: QueueConfig::from_env()?,
            blob_store: BlobStoreConfig::from_env()?,
            server: ServerConfig::from_env()?,
            observability: ObservabilityConfig::from_env()?,
            worker_pool: WorkerPoolConfig::from_env()?,
        })
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            url: env::var("DATABASE_URL").context("DATABASE_URL is required")?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .context("DB_MAX_CONNECTIONS must be a number")?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .context("DB_MIN_CONNECTIONS must be a number")?,
            acquire_timeout: Duration::from_secs(
                env::var("DB_ACQUIRE_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .context("DB_ACQUIRE_TIMEOUT_SECS must be a number")?,
            ),
            idle_timeout: Duration::from_secs(
                env::var("DB_IDLE_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .context("DB_IDLE_TIMEOUT_SECS must be a number")?,
            ),
            max_lifetime: Duration::from_secs(
                env::var("DB_MAX_LIFETIME_SECS")
                    .unwrap_or_else(|_| "1800".to_string())
                    .parse()
                    .context("DB_MAX_LIFETIME_SECS must be a number")?,
            ),
        })
    }
}

impl QueueConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            queue_url: env::var("QUEUE_URL").context("QUEUE_URL is required")?,
            poll_seconds: env::var("WORKER_POLL_SECONDS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("WORKER_POLL_SECONDS must be a number")?,
            visibility_timeout_secs: env::var("WORKER_VISIBILITY_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .context("WORKER_VISIBILITY_TIMEOUT_SECONDS must be a number")?,
            job_deadline_secs: env::var("WORKER_JOB_DEADLINE_SECONDS")
                .unwrap_or_else(|_| "2700".to_string())
                .parse()
                .context("WORKER_JOB_DEADLINE_SECONDS must be a number")?,
            max_receive_count: env::var("MAX_RECEIVE_COUNT")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("MAX_RECEIVE_COUNT must be a number")?,
        })
    }
}

impl BlobStoreConfig {
    pub fn from_env() -> Result<Self> {
        // Default limits: 100MB for downloads, 2GB for uploads (raw video is large)
        let default_max_download = (100 * 1024 * 1024).to_string();
        let default_max_upload = (2 * 1024 * 1024 * 1024).to_string();

        let access_key_id = env::var("AWS_ACCESS_KEY_ID").ok();
        let secret_access_key = env::var("AWS_SECRET_ACCESS_KEY").ok();

        Ok(Self {
            region: env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            access_key_id,
            secret_access_key,
            endpoint_url: env::var("AWS_ENDPOINT_URL").ok(),
            bucket: env::var("BLOB_BUCKET").context("BLOB_BUCKET is required")?,
            presigned_url_ttl_secs: env::var("PRESIGNED_URL_TTL_SECONDS")
                .unwrap_or_else(|_| "900".to_string())
                .parse()
                .context("PRESIGNED_URL_TTL_SECONDS must be a number")?,
            max_download_size_bytes: env::var("BLOB_MAX_DOWNLOAD_SIZE_BYTES")
                .unwrap_or(default_max_download)
                .parse()
                .context("BLOB_MAX_DOWNLOAD_SIZE_BYTES must be a number")?,
            max_upload_size_bytes: env::var("BLOB_MAX_UPLOAD_SIZE_BYTES")
                .unwrap_or(default_max_upload)
                .parse()
                .context("BLOB_MAX_UPLOAD_SIZE_BYTES must be a number")?,
        })
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let cors_origins = env::var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| s.trim().to_string())
            .collect();

        let shutdown_timeout_secs = env::var("SHUTDOWN_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok());

        Ok(Self {
            hostname: env::var("HOSTNAME").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a number")?,
            cors_allowed_origins: cors_origins,
            shutdown_timeout_secs,
        })
    }
}

impl ObservabilityConfig {
    pub fn from_env() -> Result<Self> {
        let log_format = match env::var("LOG_FORMAT")
            .unwrap_or_else(|_| "json".to_string())
            .to_lowercase()
            .as_str()
        {
            "pretty" | "human" | "text" => LogFormat::Pretty,
            _ => LogFormat::Json,
        };

        Ok(Self {
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "video-pipeline".to_string()),
            otlp_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
            log_format,
        })
    }
}

impl WorkerPoolConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            max_concurrent_jobs: env::var("WORKER_MAX_CONCURRENT_JOBS")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .context("WORKER_MAX_CONCURRENT_JOBS must be a number")?,
            health_check_port: env::var("WORKER_HEALTH_CHECK_PORT")
                .unwrap_or_else(|_| "8081".to_string())
                .parse()
                .context("WORKER_HEALTH_CHECK_PORT must be a number")?,
            reaper_interval_secs: env::var("WORKER_REAPER_INTERVAL_SECONDS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("WORKER_REAPER_INTERVAL_SECONDS must be a number")?,
            reaper_stale_after_secs: env::var("WORKER_REAPER_STALE_AFTER_SECONDS")
                .unwrap_or_else(|_| "1800".to_string())
                .parse()
                .context("WORKER_REAPER_STALE_AFTER_SECONDS must be a number")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parsing() {
        let config = ObservabilityConfig {
            service_name: "test".to_string(),
            otlp_endpoint: None,
            log_format: LogFormat::Json,
        };
        assert_eq!(config.log_format, LogFormat::Json);
    }
}
