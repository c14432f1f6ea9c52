//! Identity-provider user management client.
//!
//! - Signup goes through the public database-connection endpoint
//!   (`<issuer>dbconnections/signup`) and is authenticated by client ID only
//! - User deletion goes through the management API
//!   (`<issuer>api/v2/users/<id>`) with a `Management` token from the
//!   [`TokenCache`]
//!
//! Transport errors and provider error bodies are always surfaced.

use crate::config::Config;
use crate::observability::metrics;
use crate::services::provider::read_error;
use crate::services::token_cache::{AcquisitionError, TokenAudience, TokenCache};
use common::secret::{ExposeSecret, SecretString};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

/// Errors from management operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdpError {
    /// Transport failure.
    #[error("identity provider request failed: {0}")]
    Network(String),

    /// The provider answered with an error status.
    #[error("identity provider returned {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// A success body could not be parsed.
    #[error("invalid identity provider response: {0}")]
    InvalidResponse(String),

    /// The management token could not be obtained.
    #[error("management token unavailable: {0}")]
    Token(#[from] AcquisitionError),

    /// The user ID is empty.
    #[error("user id must not be empty")]
    InvalidUserId,
}

/// A new database-connection user.
#[derive(Clone)]
pub struct SignupRequest {
    pub email: String,
    pub password: SecretString,
    pub connection: String,
    pub username: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub name: Option<String>,
    pub nickname: Option<String>,
    pub picture: Option<String>,
}

impl SignupRequest {
    /// A request with only the required fields set.
    pub fn new(email: impl Into<String>, password: SecretString, connection: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password,
            connection: connection.into(),
            username: None,
            given_name: None,
            family_name: None,
            name: None,
            nickname: None,
            picture: None,
        }
    }
}

impl fmt::Debug for SignupRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignupRequest")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .field("connection", &self.connection)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct SignupBody<'a> {
    client_id: &'a str,
    email: &'a str,
    password: &'a str,
    connection: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    given_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    family_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nickname: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    picture: Option<&'a str>,
}

/// The user created by a signup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedUser {
    /// Provider user ID (without the connection prefix).
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default)]
    pub email: String,

    #[serde(default)]
    pub email_verified: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

/// Client for the provider's signup and user-management endpoints.
pub struct ManagementClient {
    signup_url: String,
    users_url: String,
    client_id: String,
    token_cache: Arc<TokenCache>,
    http_client: reqwest::Client,
}

impl ManagementClient {
    /// Create a client.
    pub fn new(
        config: &Config,
        token_cache: Arc<TokenCache>,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            signup_url: config.signup_url(),
            users_url: config.users_url(),
            client_id: config.client_id.clone(),
            token_cache,
            http_client,
        }
    }

    /// Register a new user in a database connection.
    ///
    /// # Errors
    ///
    /// - `Network` - transport failure
    /// - `Api` - the provider rejected the signup (e.g. user exists)
    /// - `InvalidResponse` - the success body was not a user
    #[instrument(skip_all, fields(connection = %request.connection))]
    pub async fn signup(&self, request: &SignupRequest) -> Result<CreatedUser, IdpError> {
        let start = Instant::now();
        let result = self.signup_inner(request).await;
        record("signup", &result, start);
        result
    }

    async fn signup_inner(&self, request: &SignupRequest) -> Result<CreatedUser, IdpError> {
        let body = SignupBody {
            client_id: &self.client_id,
            email: &request.email,
            password: request.password.expose_secret(),
            connection: &request.connection,
            username: request.username.as_deref(),
            given_name: request.given_name.as_deref(),
            family_name: request.family_name.as_deref(),
            name: request.name.as_deref(),
            nickname: request.nickname.as_deref(),
            picture: request.picture.as_deref(),
        };

        let response = self
            .http_client
            .post(&self.signup_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| IdpError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let (status, code, message) = read_error(response)
                .await
                .map_err(|e| IdpError::Network(e.to_string()))?;
            return Err(IdpError::Api {
                status,
                code,
                message,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| IdpError::Network(e.to_string()))?;

        let user: CreatedUser = serde_json::from_slice(&bytes)
            .map_err(|e| IdpError::InvalidResponse(e.to_string()))?;

        tracing::info!(target: "idp.management", connection = %request.connection, "User signed up");
        Ok(user)
    }

    /// Delete a user through the management API.
    ///
    /// `user_id` is path-encoded, so IDs such as `auth0|abc` are safe.
    ///
    /// # Errors
    ///
    /// - `InvalidUserId` - empty ID
    /// - `Token` - no management token could be acquired
    /// - `Network` / `Api` - the delete call failed
    #[instrument(skip_all)]
    pub async fn delete_user(&self, user_id: &str) -> Result<(), IdpError> {
        let start = Instant::now();
        let result = self.delete_user_inner(user_id).await;
        record("delete_user", &result, start);
        result
    }

    async fn delete_user_inner(&self, user_id: &str) -> Result<(), IdpError> {
        if user_id.trim().is_empty() {
            return Err(IdpError::InvalidUserId);
        }

        let url = user_url(&self.users_url, user_id)?;
        let token = self.token_cache.get_token(&TokenAudience::Management).await?;

        let response = self
            .http_client
            .delete(url)
            .bearer_auth(token.raw().expose_secret())
            .send()
            .await
            .map_err(|e| IdpError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let (status, code, message) = read_error(response)
                .await
                .map_err(|e| IdpError::Network(e.to_string()))?;
            return Err(IdpError::Api {
                status,
                code,
                message,
            });
        }

        tracing::info!(target: "idp.management", "User deleted");
        Ok(())
    }
}

/// Build `<users_url>/<user_id>` with the ID encoded as a single path segment.
fn user_url(users_url: &str, user_id: &str) -> Result<Url, IdpError> {
    let mut url = Url::parse(users_url)
        .map_err(|e| IdpError::InvalidResponse(format!("invalid users URL: {}", e)))?;

    url.path_segments_mut()
        .map_err(|()| IdpError::InvalidResponse("users URL cannot be a base".to_string()))?
        .pop_if_empty()
        .push(user_id);

    Ok(url)
}

fn record<T>(operation: &'static str, result: &Result<T, IdpError>, start: Instant) {
    let status = if result.is_ok() { "success" } else { "error" };
    metrics::record_management_request(operation, status, start.elapsed());

    if let Err(e) = result {
        tracing::warn!(target: "idp.management", operation, error = %e, "Management request failed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    // Calls against a mocked provider are covered in tests/management_tests.rs.

    use super::*;

    #[test]
    fn test_user_url_encodes_id() {
        let url = user_url("https://tenant.example.com/api/v2/users", "auth0|abc 123").unwrap();

        assert!(url
            .as_str()
            .starts_with("https://tenant.example.com/api/v2/users/auth0"));
        assert!(url.as_str().ends_with("abc%20123"));
        assert_eq!(url.path_segments().unwrap().count(), 4);
    }

    #[test]
    fn test_user_url_keeps_slashes_inside_segment() {
        let url = user_url("https://tenant.example.com/api/v2/users", "../../clients").unwrap();
        assert_eq!(
            url.as_str(),
            "https://tenant.example.com/api/v2/users/..%2F..%2Fclients"
        );
    }

    #[test]
    fn test_signup_body_omits_absent_profile_fields() {
        let request = SignupRequest::new(
            "user@example.com",
            SecretString::from("hunter2!"),
            "Username-Password-Authentication",
        );
        let body = SignupBody {
            client_id: "client",
            email: &request.email,
            password: request.password.expose_secret(),
            connection: &request.connection,
            username: request.username.as_deref(),
            given_name: None,
            family_name: None,
            name: None,
            nickname: None,
            picture: None,
        };

        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["client_id"], "client");
        assert_eq!(value["email"], "user@example.com");
        assert_eq!(value["connection"], "Username-Password-Authentication");
        assert!(value.get("username").is_none());
        assert!(value.get("picture").is_none());
    }

    #[test]
    fn test_signup_request_debug_redacts_password() {
        let request = SignupRequest::new("user@example.com", SecretString::from("hunter2!"), "db");
        let debug = format!("{:?}", request);

        assert!(!debug.contains("hunter2!"));
        assert!(debug.contains("user@example.com"));
    }

    #[test]
    fn test_created_user_deserialization() {
        let user: CreatedUser = serde_json::from_str(
            r#"{
                "_id": "5f7c8ec7c33c6c004bbafe82",
                "email_verified": false,
                "email": "user@example.com",
                "username": "user",
                "given_name": "Ada",
                "family_name": "Lovelace",
                "name": "Ada Lovelace",
                "nickname": "ada",
                "picture": "https://example.com/ada.png"
            }"#,
        )
        .unwrap();

        assert_eq!(user.id, "5f7c8ec7c33c6c004bbafe82");
        assert!(!user.email_verified);
        assert_eq!(user.given_name.as_deref(), Some("Ada"));
    }

    #[test]
    fn test_created_user_minimal() {
        let user: CreatedUser = serde_json::from_str(r#"{"_id":"abc","email":"a@b.c"}"#).unwrap();
        assert_eq!(user.id, "abc");
        assert!(user.username.is_none());
    }
}
