//! Authentication middleware for protected routes.
//!
//! Extracts the Bearer token from the Authorization header, verifies it with
//! the [`TokenVerifier`] for the configured API audience, and injects the
//! verified claims into request extensions.

use crate::auth::{Claims, Token, TokenVerifier};
use crate::errors::AuthError;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    /// Token verifier with JWKS client.
    pub verifier: Arc<TokenVerifier>,

    /// Audience every inbound token must carry.
    pub audience: String,
}

impl AuthState {
    /// Authenticate a request from its headers.
    ///
    /// No verifier call is made when the header is missing or malformed.
    ///
    /// # Errors
    ///
    /// - `AuthError::MissingToken` - no usable bearer token
    /// - `AuthError::InvalidToken` - the token failed verification
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Token, AuthError> {
        let raw = extract_bearer(headers).ok_or_else(|| {
            tracing::debug!(target: "idp.middleware.auth", "Missing or malformed Authorization header");
            AuthError::MissingToken
        })?;

        self.verifier
            .verify(raw, &self.audience)
            .await
            .map_err(|e| {
                tracing::info!(target: "idp.middleware.auth", reason = e.kind(), "Request rejected");
                AuthError::InvalidToken(e)
            })
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
///
/// The scheme is matched case-insensitively. Returns `None` for a missing
/// header, another scheme, or an empty token.
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();

    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

/// Authentication middleware that verifies bearer tokens.
///
/// # Authorization Header Format
///
/// ```text
/// Authorization: Bearer <token>
/// ```
///
/// # Response
///
/// - Returns 401 Unauthorized with WWW-Authenticate header if the token is
///   missing or invalid; the specific reason is attached as a
///   [`crate::errors::Rejection`] response extension
/// - Continues to the next handler with [`Claims`] in extensions otherwise
#[instrument(skip(state, req, next), name = "idp.middleware.auth")]
pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, AuthError> {
    let token = state.authenticate(req.headers()).await?;

    req.extensions_mut().insert(token.into_claims());

    Ok(next.run(req).await)
}

/// Extension trait for extracting claims from request.
///
/// Provides a convenient method for handlers to get the authenticated claims.
pub trait ClaimsExt {
    /// Get the authenticated claims from request extensions.
    ///
    /// Returns `None` if auth middleware was not applied to this request.
    fn claims(&self) -> Option<&Claims>;
}

impl<B> ClaimsExt for axum::http::Request<B> {
    fn claims(&self) -> Option<&Claims> {
        self.extensions().get::<Claims>()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    // Full middleware tests with a mocked JWKS endpoint live in
    // tests/auth_tests.rs.

    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_auth_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AuthState>();
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer(&headers("Bearer abc.def.ghi")), Some("abc.def.ghi"));
        assert_eq!(extract_bearer(&headers("bearer abc")), Some("abc"));
        assert_eq!(extract_bearer(&headers("BEARER  abc ")), Some("abc"));
    }

    #[test]
    fn test_extract_bearer_rejects_other_forms() {
        assert_eq!(extract_bearer(&HeaderMap::new()), None);
        assert_eq!(extract_bearer(&headers("Basic dXNlcjpwYXNz")), None);
        assert_eq!(extract_bearer(&headers("Bearer")), None);
        assert_eq!(extract_bearer(&headers("Bearer    ")), None);
        assert_eq!(extract_bearer(&headers("Token abc")), None);
    }

    #[test]
    fn test_claims_ext_reads_extensions() {
        let mut req = axum::http::Request::new(());
        assert!(req.claims().is_none());

        let claims: Claims = serde_json::from_str(r#"{"sub":"s","exp":1}"#).unwrap();
        req.extensions_mut().insert(claims);
        assert_eq!(req.claims().map(|c| c.exp), Some(1));
    }
}
