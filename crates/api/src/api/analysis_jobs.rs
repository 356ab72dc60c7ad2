use actix_web::{HttpResponse, Responder, get, post, web};
use semantic_video_core::export::export_report;
use semantic_video_core::jobstore::JobStore;
use semantic_video_core::observability::record_export_request;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::{conflict, from_jobstore_error, internal_error, not_found};

#[get("/analysis-jobs/{id}")]
pub(crate) async fn get_analysis_job(store: web::Data<Arc<dyn JobStore>>, path: web::Path<Uuid>) -> impl Responder {
    match store.get_job(path.into_inner()).await {
        Ok(job) => HttpResponse::Ok().json(job),
        Err(e) => from_jobstore_error(e),
    }
}

/// `ExportGate` (spec §4.5): 409 unless the job is in a terminal-success
/// state, otherwise a rendered PDF. The session's `analysis_context` is
/// consulted to resolve the mode when the job itself never recorded one
/// and no result payload survived to carry `analysis_mode_used`.
#[post("/analysis-jobs/{id}/export-pdf")]
pub(crate) async fn export_analysis_job_pdf(store: web::Data<Arc<dyn JobStore>>, path: web::Path<Uuid>) -> impl Responder {
    let job_id = path.into_inner();
    let job = match store.get_job(job_id).await {
        Ok(job) => job,
        Err(e) => return from_jobstore_error(e),
    };

    let session_analysis_context = match store.get_session(job.session_id).await {
        Ok(session) => session.analysis_context,
        Err(_) => None,
    };

    match export_report(&job, session_analysis_context.as_deref()) {
        Ok(bytes) => {
            record_export_request("200");
            HttpResponse::Ok().content_type("application/pdf").body(bytes)
        }
        Err(semantic_video_core::errors::ExportError::PreconditionFailed(msg)) => {
            record_export_request("409");
            conflict(msg)
        }
        Err(semantic_video_core::errors::ExportError::NotFound) => {
            record_export_request("404");
            not_found("analysis job not found")
        }
        Err(e) => {
            record_export_request("500");
            internal_error(e)
        }
    }
}
