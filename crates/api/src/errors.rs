use actix_web::HttpResponse;
use serde_json::json;

/// Create a standardized JSON error response
pub(crate) fn error_response(
    status: actix_web::http::StatusCode,
    message: impl std::fmt::Display,
) -> HttpResponse {
    HttpResponse::build(status).json(json!({
        "error": message.to_string()
    }))
}

/// Create an Internal Server Error JSON response
pub(crate) fn internal_error(message: impl std::fmt::Display) -> HttpResponse {
    error_response(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR, message)
}

/// Create a Bad Request JSON response
pub(crate) fn bad_request(message: impl std::fmt::Display) -> HttpResponse {
    error_response(actix_web::http::StatusCode::BAD_REQUEST, message)
}

/// Create a Not Found JSON response
pub(crate) fn not_found(message: impl std::fmt::Display) -> HttpResponse {
    error_response(actix_web::http::StatusCode::NOT_FOUND, message)
}

/// Create an Unauthorized JSON response
pub(crate) fn unauthorized(message: impl std::fmt::Display) -> HttpResponse {
    error_response(actix_web::http::StatusCode::UNAUTHORIZED, message)
}

/// Create a Forbidden JSON response (caller authenticated but not the owner)
pub(crate) fn forbidden(message: impl std::fmt::Display) -> HttpResponse {
    error_response(actix_web::http::StatusCode::FORBIDDEN, message)
}

/// Create a Conflict JSON response (precondition failed on the job/session
/// state machine, e.g. exporting a non-terminal job)
pub(crate) fn conflict(message: impl std::fmt::Display) -> HttpResponse {
    error_response(actix_web::http::StatusCode::CONFLICT, message)
}

/// Create a Service Unavailable JSON response for transient infra errors
/// the client should retry (spec §7)
pub(crate) fn service_unavailable(message: impl std::fmt::Display) -> HttpResponse {
    error_response(actix_web::http::StatusCode::SERVICE_UNAVAILABLE, message)
}

/// Maps a `JobStoreError` onto the HTTP error taxonomy.
pub(crate) fn from_jobstore_error(err: semantic_video_core::errors::JobStoreError) -> HttpResponse {
    use semantic_video_core::errors::JobStoreError;
    match err {
        JobStoreError::NotFound => not_found("not found"),
        JobStoreError::PreconditionFailed(msg) => conflict(msg),
        JobStoreError::Transient(e) => service_unavailable(e),
        JobStoreError::Other(e) => internal_error(e),
    }
}
