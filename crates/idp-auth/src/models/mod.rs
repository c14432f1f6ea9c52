//! Response models shared by the HTTP handlers.

use serde::{Deserialize, Serialize};

/// Health check response.
///
/// Returned by the `/v1/health` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service health status ("healthy" or "unhealthy").
    pub status: String,

    /// Issuer whose tokens this service accepts.
    pub issuer: String,

    /// Number of signing keys currently loaded.
    pub signing_keys: usize,
}

/// Response for `/v1/me`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeResponse {
    /// Subject (user ID, or `<client_id>@clients` for machine tokens).
    pub sub: String,

    /// Token scopes.
    pub scopes: Vec<String>,

    /// RBAC permissions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,

    /// Token expiration timestamp.
    pub exp: i64,

    /// Token issued-at timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}
