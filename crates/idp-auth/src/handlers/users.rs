//! User management handlers.

use crate::auth::Claims;
use crate::errors::AuthError;
use crate::routes::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Extension;
use std::sync::Arc;
use tracing::instrument;

/// Permission required to delete users.
pub const DELETE_USERS_PERMISSION: &str = "delete:users";

/// Handler for DELETE /v1/users/:id
///
/// Requires `delete:users` as a scope or RBAC permission on the caller's
/// token, then deletes the user through the provider's management API.
///
/// ## Response
///
/// - 204 No Content on success
/// - 403 Forbidden if the caller lacks `delete:users`
/// - 404 Not Found if the provider does not know the user
/// - 502 Bad Gateway if the provider call fails
#[instrument(skip_all, name = "idp.handlers.delete_user")]
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, AuthError> {
    if !claims.grants(DELETE_USERS_PERMISSION) {
        tracing::info!(target: "idp.handlers.users", "Caller lacks delete:users");
        return Err(AuthError::Forbidden(format!(
            "Requires the {} permission",
            DELETE_USERS_PERMISSION
        )));
    }

    state.management.delete_user(&user_id).await?;

    Ok(StatusCode::NO_CONTENT)
}
