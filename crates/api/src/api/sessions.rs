use actix_web::{HttpResponse, Responder, delete, get, post, web};
use semantic_video_core::blob::BlobStore;
use semantic_video_core::jobstore::{JobStore, NewSession};
use semantic_video_core::models::{PaginatedResponse, SessionStatus};
use semantic_video_core::validation;
use std::sync::Arc;
use tracing::warn;

use crate::auth::AuthContext;
use crate::errors::{bad_request, from_jobstore_error};

/// Best-effort blob cleanup after a cascade delete (spec §4.1:
/// "DB commit succeeds even if blob delete fails — log and continue").
/// Returns the count that actually succeeded, for bulk delete's response.
async fn delete_blobs_best_effort(blob_store: &dyn BlobStore, s3_keys: &[String]) -> usize {
    let mut deleted = 0;
    for key in s3_keys {
        match blob_store.delete(key).await {
            Ok(()) => deleted += 1,
            Err(e) => warn!(s3_key = %key, error = %e, "best-effort blob delete failed, continuing"),
        }
    }
    deleted
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct CreateSessionRequest {
    pub title: String,
    #[serde(default)]
    pub player_ids: Vec<String>,
    pub notes: Option<String>,
    pub analysis_context: Option<String>,
    pub camera_view: Option<String>,
}

/// Not in the core-relevant HTTP table (spec §6), but `InitiateUpload`'s
/// precondition ("session exists") requires a session to already be on
/// hand — see DESIGN.md's session-creation-timing note.
#[post("/sessions")]
pub(crate) async fn create_session(
    auth: AuthContext,
    store: web::Data<Arc<dyn JobStore>>,
    body: web::Json<CreateSessionRequest>,
) -> impl Responder {
    if let Err(e) = validation::validate_title(&body.title) {
        return bad_request(e);
    }
    if let Err(e) = validation::validate_player_ids(&body.player_ids) {
        return bad_request(e);
    }
    if let Some(notes) = &body.notes
        && let Err(e) = validation::validate_description(notes)
    {
        return bad_request(e);
    }

    let new_session = NewSession {
        owner_id: auth.owner_id,
        title: body.title.clone(),
        player_ids: body.player_ids.clone(),
        notes: body.notes.clone(),
        analysis_context: body.analysis_context.clone(),
        camera_view: body.camera_view.clone(),
    };

    match store.create_session(new_session).await {
        Ok(session) => HttpResponse::Created().json(session),
        Err(e) => from_jobstore_error(e),
    }
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct ListSessionsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    pub status_filter: Option<SessionStatus>,
    #[serde(default = "default_exclude_failed")]
    pub exclude_failed: bool,
}

fn default_limit() -> i64 {
    50
}

fn default_exclude_failed() -> bool {
    true
}

#[get("/sessions")]
pub(crate) async fn list_sessions(
    auth: AuthContext,
    store: web::Data<Arc<dyn JobStore>>,
    query: web::Query<ListSessionsQuery>,
) -> impl Responder {
    match store
        .list_sessions(&auth.owner_id, query.limit, query.offset, query.status_filter, query.exclude_failed)
        .await
    {
        Ok((sessions, total_count)) => HttpResponse::Ok().json(PaginatedResponse {
            items: sessions,
            total_count,
            limit: query.limit,
            offset: query.offset,
        }),
        Err(e) => from_jobstore_error(e),
    }
}

#[delete("/sessions/{id}")]
pub(crate) async fn delete_session(
    auth: AuthContext,
    store: web::Data<Arc<dyn JobStore>>,
    blob_store: web::Data<Arc<dyn BlobStore>>,
    path: web::Path<uuid::Uuid>,
) -> impl Responder {
    match store.delete_session_cascade(path.into_inner(), &auth.owner_id).await {
        Ok(s3_keys) => {
            delete_blobs_best_effort(blob_store.as_ref().as_ref(), &s3_keys).await;
            HttpResponse::NoContent().finish()
        }
        Err(e) => from_jobstore_error(e),
    }
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct BulkDeleteQuery {
    pub status_filter: Option<SessionStatus>,
    pub older_than_days: Option<i64>,
}

#[derive(Debug, serde::Serialize)]
pub(crate) struct BulkDeleteResponse {
    pub deleted_count: usize,
    pub s3_files_deleted: usize,
}

/// Scoped bulk delete: lists every session owned by the caller matching
/// `status_filter`/`older_than_days`, then cascades the delete over that
/// set. Unbounded page size — this is an admin-style cleanup operation,
/// not a latency-sensitive read path.
#[delete("/sessions/bulk")]
pub(crate) async fn bulk_delete_sessions(
    auth: AuthContext,
    store: web::Data<Arc<dyn JobStore>>,
    blob_store: web::Data<Arc<dyn BlobStore>>,
    query: web::Query<BulkDeleteQuery>,
) -> impl Responder {
    let (candidates, _total) = match store.list_sessions(&auth.owner_id, i64::MAX, 0, query.status_filter, false).await {
        Ok(page) => page,
        Err(e) => return from_jobstore_error(e),
    };

    let cutoff = query.older_than_days.map(|days| chrono::Utc::now() - chrono::Duration::days(days));
    let session_ids: Vec<uuid::Uuid> = candidates
        .into_iter()
        .filter(|s| cutoff.is_none_or(|cutoff| s.created_at <= cutoff))
        .map(|s| s.id)
        .collect();

    match store.bulk_delete_sessions(&session_ids, &auth.owner_id).await {
        Ok(s3_keys) => {
            let s3_files_deleted = delete_blobs_best_effort(blob_store.as_ref().as_ref(), &s3_keys).await;
            HttpResponse::Ok().json(BulkDeleteResponse {
                deleted_count: session_ids.len(),
                s3_files_deleted,
            })
        }
        Err(e) => from_jobstore_error(e),
    }
}
