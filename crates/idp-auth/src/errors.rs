//! Service error types.
//!
//! All errors map to HTTP status codes via the `IntoResponse` impl. Messages
//! returned to clients are generic; the specific reason is logged server-side
//! and, for rejected tokens, attached to the response as a [`Rejection`]
//! extension so tests and outer layers can inspect it.

use crate::auth::TokenError;
use crate::services::management::IdpError;
use crate::services::token_cache::AcquisitionError;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Realm advertised in `WWW-Authenticate` challenges.
pub const AUTH_REALM: &str = "idp-auth";

/// Why the authentication middleware rejected a request.
///
/// Inserted into the extensions of every 401 response produced by
/// [`AuthError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// No usable `Authorization: Bearer` header.
    MissingToken,

    /// A token was present but failed verification.
    InvalidToken(TokenError),
}

/// Service error type.
///
/// Maps to HTTP status codes:
/// - MissingToken, InvalidToken: 401 Unauthorized
/// - Forbidden: 403 Forbidden
/// - BadRequest: 400 Bad Request
/// - NotFound: 404 Not Found
/// - Upstream: 502 Bad Gateway
/// - Internal: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(#[from] TokenError),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Identity provider call failed: {0}")]
    Upstream(String),

    #[error("Internal server error")]
    Internal,
}

impl AuthError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::MissingToken | AuthError::InvalidToken(_) => 401,
            AuthError::Forbidden(_) => 403,
            AuthError::BadRequest(_) => 400,
            AuthError::NotFound(_) => 404,
            AuthError::Upstream(_) => 502,
            AuthError::Internal => 500,
        }
    }
}

impl From<AcquisitionError> for AuthError {
    fn from(err: AcquisitionError) -> Self {
        AuthError::Upstream(err.to_string())
    }
}

impl From<IdpError> for AuthError {
    fn from(err: IdpError) -> Self {
        match err {
            IdpError::Api { status: 404, .. } => AuthError::NotFound("User not found".to_string()),
            IdpError::Api {
                status: 400,
                ref message,
                ..
            } => AuthError::BadRequest(message.clone()),
            other => AuthError::Upstream(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code, message, rejection) = match self {
            AuthError::MissingToken => (
                StatusCode::UNAUTHORIZED,
                "MISSING_TOKEN",
                "The request is missing a bearer token".to_string(),
                Some(Rejection::MissingToken),
            ),
            AuthError::InvalidToken(reason) => {
                // Specific reason stays server-side
                tracing::debug!(target: "idp.middleware.auth", reason = reason.kind(), error = %reason, "Rejecting invalid token");
                (
                    StatusCode::UNAUTHORIZED,
                    "INVALID_TOKEN",
                    "The access token is invalid or expired".to_string(),
                    Some(Rejection::InvalidToken(reason)),
                )
            }
            AuthError::Forbidden(reason) => (StatusCode::FORBIDDEN, "FORBIDDEN", reason, None),
            AuthError::BadRequest(reason) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", reason, None),
            AuthError::NotFound(resource) => (StatusCode::NOT_FOUND, "NOT_FOUND", resource, None),
            AuthError::Upstream(reason) => {
                tracing::warn!(target: "idp.management", reason = %reason, "Identity provider call failed");
                (
                    StatusCode::BAD_GATEWAY,
                    "UPSTREAM_ERROR",
                    "The identity provider request failed".to_string(),
                    None,
                )
            }
            AuthError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        });

        let mut response = (status, body).into_response();

        if let Some(rejection) = rejection {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer realm=\"idp-auth\""),
            );
            response.extensions_mut().insert(rejection);
        }

        response
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::ClaimsError;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(AuthError::MissingToken.to_string(), "Missing bearer token");
        assert_eq!(
            AuthError::InvalidToken(TokenError::BadSignature).to_string(),
            "Invalid token: token signature is invalid"
        );
        assert_eq!(
            AuthError::Forbidden("missing delete:users".to_string()).to_string(),
            "Forbidden: missing delete:users"
        );
        assert_eq!(AuthError::Internal.to_string(), "Internal server error");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthError::MissingToken.status_code(), 401);
        assert_eq!(
            AuthError::InvalidToken(TokenError::MissingKeyId).status_code(),
            401
        );
        assert_eq!(AuthError::Forbidden("x".to_string()).status_code(), 403);
        assert_eq!(AuthError::BadRequest("x".to_string()).status_code(), 400);
        assert_eq!(AuthError::NotFound("x".to_string()).status_code(), 404);
        assert_eq!(AuthError::Upstream("x".to_string()).status_code(), 502);
        assert_eq!(AuthError::Internal.status_code(), 500);
    }

    #[tokio::test]
    async fn test_missing_token_response() {
        let response = AuthError::MissingToken.into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let www_auth = response
            .headers()
            .get("WWW-Authenticate")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(www_auth.contains(&format!("Bearer realm=\"{}\"", AUTH_REALM)));
        assert_eq!(
            response.extensions().get::<Rejection>(),
            Some(&Rejection::MissingToken)
        );

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "MISSING_TOKEN");
    }

    #[tokio::test]
    async fn test_invalid_token_body_is_generic() {
        let reason = TokenError::Claims(ClaimsError::InvalidAudience);
        let response = AuthError::InvalidToken(reason.clone()).into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key("WWW-Authenticate"));
        assert_eq!(
            response.extensions().get::<Rejection>(),
            Some(&Rejection::InvalidToken(reason))
        );

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "INVALID_TOKEN");
        assert_eq!(
            body_json["error"]["message"],
            "The access token is invalid or expired"
        );
        assert!(!body_json.to_string().contains("audience"));
    }

    #[tokio::test]
    async fn test_forbidden_response_has_no_challenge() {
        let response = AuthError::Forbidden("Missing permission".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(!response.headers().contains_key("WWW-Authenticate"));
        assert!(response.extensions().get::<Rejection>().is_none());

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "FORBIDDEN");
        assert_eq!(body_json["error"]["message"], "Missing permission");
    }

    #[tokio::test]
    async fn test_upstream_response_is_generic() {
        let response =
            AuthError::Upstream("token endpoint returned 500: boom".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "UPSTREAM_ERROR");
        assert!(!body_json.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_internal_response() {
        let response = AuthError::Internal.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(body_json["error"]["message"], "An internal error occurred");
    }

    #[test]
    fn test_idp_error_mapping() {
        let not_found = IdpError::Api {
            status: 404,
            code: "inexistent_user".to_string(),
            message: "The user does not exist.".to_string(),
        };
        assert!(matches!(AuthError::from(not_found), AuthError::NotFound(_)));

        let bad_request = IdpError::Api {
            status: 400,
            code: "invalid_body".to_string(),
            message: "Path validation error".to_string(),
        };
        assert!(
            matches!(AuthError::from(bad_request), AuthError::BadRequest(msg) if msg == "Path validation error")
        );

        let server = IdpError::Api {
            status: 503,
            code: "unavailable".to_string(),
            message: "down".to_string(),
        };
        assert!(matches!(AuthError::from(server), AuthError::Upstream(_)));
    }
}
