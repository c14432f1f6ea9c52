//! Shared plumbing for calls to the identity provider.
//!
//! Every outbound request (JWKS, token endpoint, signup, management API) goes
//! through a client built by [`build_http_client`], so each call carries both
//! a request timeout and a connect timeout.

use serde::Deserialize;
use std::time::Duration;

/// Upper bound on the TCP/TLS connect phase of provider calls.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the HTTP client used for provider calls.
///
/// The connect timeout is capped by the request timeout. Falls back to the
/// default client if the builder fails.
pub fn build_http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT.min(timeout))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(target: "idp.provider", error = %e, "Failed to build HTTP client with custom config, using defaults");
            reqwest::Client::new()
        })
}

/// Error body returned by the provider.
///
/// The token endpoint, the signup endpoint and the management API each use a
/// different shape:
///
/// ```text
/// oauth/token:         {"error": "access_denied", "error_description": "..."}
/// dbconnections/signup {"name": "BadRequestError", "code": "invalid_signup",
///                       "description": "...", "statusCode": 400}
/// api/v2:              {"statusCode": 404, "error": "Not Found",
///                       "message": "...", "errorCode": "inexistent_user"}
/// ```
///
/// All of them collapse into a machine-readable `code` and a human `message`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default, rename = "errorCode")]
    error_code: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

impl ProviderErrorBody {
    /// Parse a provider error body, tolerating non-JSON bodies.
    pub fn parse(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }

    /// Machine-readable error code, most specific field first.
    pub fn code(&self) -> String {
        self.error_code
            .as_ref()
            .or(self.code.as_ref())
            .or(self.error.as_ref())
            .or(self.name.as_ref())
            .cloned()
            .unwrap_or_else(|| "unknown_error".to_string())
    }

    /// Human-readable message.
    pub fn message(&self) -> String {
        self.error_description
            .as_ref()
            .or(self.message.as_ref())
            .or(self.description.as_ref())
            .cloned()
            .unwrap_or_default()
    }
}

/// Read a non-success response into `(status, code, message)`.
///
/// # Errors
///
/// The transport error if the body cannot be read to the end.
pub async fn read_error(response: reqwest::Response) -> Result<(u16, String, String), reqwest::Error> {
    let status = response.status().as_u16();
    let body = response.bytes().await?;
    let parsed = ProviderErrorBody::parse(&body);
    Ok((status, parsed.code(), parsed.message()))
}
