//! Current user handler.
//!
//! Returns information about the authenticated user or client from the
//! verified token claims.

use crate::auth::Claims;
use crate::models::MeResponse;
use axum::{Extension, Json};
use tracing::instrument;

/// Handler for GET /v1/me
///
/// Requires valid authentication via the auth middleware.
///
/// ## Response
///
/// ```json
/// {
///   "sub": "auth0|5f7c8ec7c33c6c004bbafe82",
///   "scopes": ["read:me"],
///   "exp": 1234567890,
///   "iat": 1234567800
/// }
/// ```
#[instrument(skip_all, name = "idp.handlers.me")]
pub async fn get_me(Extension(claims): Extension<Claims>) -> Json<MeResponse> {
    tracing::debug!(target: "idp.handlers.me", "Returning token claims");

    let scopes = claims.scopes().iter().map(|s| s.to_string()).collect();

    Json(MeResponse {
        sub: claims.sub,
        scopes,
        permissions: claims.permissions,
        exp: claims.exp,
        iat: claims.iat,
    })
}
