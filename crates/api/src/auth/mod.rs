//! Authorization context extraction.
//!
//! Authentication, role/tier gating, billing, and feature entitlements are
//! an external collaborator's concern; this crate only needs an opaque
//! owner identity to enforce per-session ownership checks. The upstream
//! gateway is expected to authenticate the caller and forward the
//! resolved identity in `X-Owner-Id`.

use actix_web::{FromRequest, HttpRequest, dev::Payload};
use std::future::{Ready, ready};

pub(crate) const OWNER_HEADER: &str = "X-Owner-Id";

#[derive(Debug, Clone)]
pub(crate) struct AuthContext {
    pub owner_id: String,
}

impl FromRequest for AuthContext {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let owner_id = req
            .headers()
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        match owner_id {
            Some(owner_id) if !owner_id.is_empty() => ready(Ok(AuthContext { owner_id })),
            _ => ready(Err(actix_web::error::ErrorUnauthorized(format!(
                "missing or empty {OWNER_HEADER} header"
            )))),
        }
    }
}
