//! Typed errors at component boundaries (spec §10.3).
//!
//! Internal glue code uses `anyhow::Result` with `.context(...)`; these
//! types exist at the seams (JobStore, BlobStore, MessageQueue, the export
//! flow) so callers can `match` on a variant instead of string-sniffing an
//! error message. The upload flow reuses `JobStoreError`/`BlobStoreError`
//! directly rather than introducing its own wrapper type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("not found")]
    NotFound,
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("transient database error: {0}")]
    Transient(#[from] sqlx::Error),
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("object not found at key {0}")]
    NotFound(String),
    #[error("transient blob store error: {0}")]
    Transient(String),
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("transient queue error: {0}")]
    Transient(String),
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("job not found")]
    NotFound,
    #[error("job is not in a terminal state: {0}")]
    PreconditionFailed(String),
    #[error("required artifact missing: {0}")]
    ArtifactMissing(String),
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}
