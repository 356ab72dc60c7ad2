//! `UploadCoordinator` HTTP surface (spec §4.1): `InitiateUpload` and
//! `CompleteUpload`. `DeleteSession` lives in `api::sessions` since it
//! operates on the session resource, not the upload lifecycle.

use actix_web::{HttpResponse, Responder, post, web};
use semantic_video_core::blob::BlobStore;
use semantic_video_core::config::BlobStoreConfig;
use semantic_video_core::jobstore::JobStore;
use semantic_video_core::models::{AnalysisMode, JobStatus};
use semantic_video_core::observability::{record_preflight, record_upload_complete, record_upload_initiate};
use semantic_video_core::queue::MessageQueue;
use semantic_video_core::validation;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::errors::{bad_request, forbidden, from_jobstore_error, service_unavailable};

const VIDEO_CONTENT_TYPE: &str = "video/mp4";

#[derive(Debug, serde::Deserialize)]
pub(crate) struct InitiateUploadRequest {
    pub session_id: Uuid,
    pub sample_fps: i32,
    #[serde(default)]
    pub include_frames: bool,
    pub analysis_mode: Option<AnalysisMode>,
}

#[derive(Debug, serde::Serialize)]
pub(crate) struct InitiateUploadResponse {
    pub job_id: Uuid,
    pub presigned_url: String,
    pub s3_bucket: String,
    pub s3_key: String,
}

#[post("/videos/upload/initiate")]
pub(crate) async fn initiate_upload(
    auth: AuthContext,
    store: web::Data<Arc<dyn JobStore>>,
    blob_store: web::Data<Arc<dyn BlobStore>>,
    blob_config: web::Data<BlobStoreConfig>,
    body: web::Json<InitiateUploadRequest>,
) -> impl Responder {
    if let Err(e) = validation::validate_sample_fps(body.sample_fps) {
        return bad_request(e);
    }

    let session = match store.get_session(body.session_id).await {
        Ok(session) => session,
        Err(e) => {
            record_upload_initiate("not_found");
            return from_jobstore_error(e);
        }
    };

    if session.owner_id != auth.owner_id {
        record_upload_initiate("forbidden");
        return forbidden("session does not belong to caller");
    }

    let job_id = Uuid::new_v4();
    let s3_key = format!("{}/{}/{}.mp4", session.owner_id, session.id, job_id);

    let job = match store
        .create_job(session.id, s3_key.clone(), body.sample_fps, body.include_frames, body.analysis_mode)
        .await
    {
        Ok(job) => job,
        Err(e) => {
            record_upload_initiate("failed");
            return from_jobstore_error(e);
        }
    };

    match blob_store.presigned_put_url(&s3_key, VIDEO_CONTENT_TYPE).await {
        Ok(presigned_url) => {
            record_upload_initiate("success");
            HttpResponse::Ok().json(InitiateUploadResponse {
                job_id: job.id,
                presigned_url,
                s3_bucket: blob_config.bucket.clone(),
                s3_key,
            })
        }
        Err(e) => {
            record_upload_initiate("failed");
            service_unavailable(e)
        }
    }
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct CompleteUploadRequest {
    pub job_id: Uuid,
}

#[derive(Debug, serde::Serialize)]
pub(crate) struct CompleteUploadResponse {
    pub status: JobStatus,
    pub queue_message_enqueued: bool,
}

/// Idempotency table (spec §4.1): a job already past `awaiting_upload`/
/// `failed` is a no-op success. Otherwise runs the S3 HEAD preflight and,
/// only on success, transitions to `queued` and enqueues — in that order,
/// so a crash between transition and enqueue is recoverable (worker
/// rescan) but an enqueue can never precede the DB transition.
#[post("/videos/upload/complete")]
pub(crate) async fn complete_upload(
    store: web::Data<Arc<dyn JobStore>>,
    blob_store: web::Data<Arc<dyn BlobStore>>,
    queue: web::Data<Arc<dyn MessageQueue>>,
    body: web::Json<CompleteUploadRequest>,
) -> impl Responder {
    let status = match store.peek_job_status(body.job_id).await {
        Ok(status) => status,
        Err(e) => return from_jobstore_error(e),
    };

    if status.is_already_dispatched() {
        record_upload_complete("idempotent_noop");
        return HttpResponse::Ok().json(CompleteUploadResponse {
            status,
            queue_message_enqueued: false,
        });
    }

    let job = match store.get_job(body.job_id).await {
        Ok(job) => job,
        Err(e) => return from_jobstore_error(e),
    };

    match blob_store.head(&job.s3_key).await {
        Ok(true) => {
            record_preflight("success");
        }
        Ok(false) => {
            record_preflight("missing");
            record_upload_complete("upload_missing");
            if let Err(e) = store.mark_upload_missing(job.id, &job.s3_key).await {
                return from_jobstore_error(e);
            }
            return bad_request("Upload not found");
        }
        Err(e) => {
            record_preflight("error");
            return service_unavailable(e);
        }
    }

    let queued_job = match store.transition_to_queued(job.id).await {
        Ok(job) => job,
        Err(e) => return from_jobstore_error(e),
    };

    if let Err(e) = queue.enqueue(queued_job.id).await {
        record_upload_complete("enqueue_failed");
        return service_unavailable(e);
    }

    record_upload_complete("success");
    HttpResponse::Ok().json(CompleteUploadResponse {
        status: queued_job.status,
        queue_message_enqueued: true,
    })
}
