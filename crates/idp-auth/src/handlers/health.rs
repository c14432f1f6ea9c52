//! Health check handler.

use crate::models::HealthResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::Json;
use std::sync::Arc;
use tracing::instrument;

/// Handler for GET /v1/health
///
/// The service only starts once a key set has been loaded, so a running
/// instance can always verify tokens; the response reports the issuer and
/// the size of the current key set.
///
/// ## Example Response
///
/// ```json
/// {
///   "status": "healthy",
///   "issuer": "https://tenant.eu.auth0.com/",
///   "signing_keys": 2
/// }
/// ```
#[instrument(skip_all, name = "idp.health.check")]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let key_set = state.verifier.jwks().current().await;

    let status = if key_set.is_empty() {
        "unhealthy"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        issuer: state.verifier.issuer().to_string(),
        signing_keys: key_set.len(),
    })
}
