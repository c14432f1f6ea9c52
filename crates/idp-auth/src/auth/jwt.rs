//! Access-token verification.
//!
//! Verifies provider-issued RS256 tokens against the key set held by the
//! [`JwksClient`] and validates their claims for a caller-supplied audience.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Only RS256 is accepted; `none`, HMAC and every other `alg` is rejected
//!   before a key is even looked up
//! - An unknown `kid` triggers at most one rate-limited key-set refresh
//! - A [`Token`] value only exists once signature and claims have passed

use crate::auth::claims::Claims;
use crate::auth::jwks::{JwksClient, KeySetError, RefreshOutcome, SigningKey};
use crate::auth::validation::{validate_claims, ClaimsError};
use crate::observability::metrics;
use common::jwt::{CompactToken, JwtFormatError, TokenHeader, RS256};
use common::secret::SecretString;
use jsonwebtoken::Algorithm;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

/// Reasons a token fails verification.
///
/// These are server-side diagnostics. Clients only ever see a generic message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token: {0}")]
    Malformed(#[from] JwtFormatError),

    #[error("token header has no key id")]
    MissingKeyId,

    #[error("unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("no signing key with id {0}")]
    KeyNotFound(String),

    /// The `kid` was unknown and refreshing the key set failed.
    #[error("signing key lookup failed: {0}")]
    KeySetUnavailable(KeySetError),

    #[error("token signature is invalid")]
    BadSignature,

    #[error(transparent)]
    Claims(#[from] ClaimsError),
}

impl TokenError {
    /// Bounded label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            TokenError::Malformed(_) => "malformed",
            TokenError::MissingKeyId => "missing_key_id",
            TokenError::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            TokenError::KeyNotFound(_) => "key_not_found",
            TokenError::KeySetUnavailable(_) => "key_set_unavailable",
            TokenError::BadSignature => "bad_signature",
            TokenError::Claims(ClaimsError::Expired) => "expired",
            TokenError::Claims(ClaimsError::NotYetValid) => "not_yet_valid",
            TokenError::Claims(ClaimsError::IssuedInFuture) => "issued_in_future",
            TokenError::Claims(ClaimsError::InvalidIssuer) => "invalid_issuer",
            TokenError::Claims(ClaimsError::InvalidAudience) => "invalid_audience",
        }
    }
}

/// A verified access token.
///
/// Immutable. The raw compact string is kept for forwarding as a bearer
/// credential and is redacted in Debug output.
#[derive(Clone)]
pub struct Token {
    raw: SecretString,
    header: TokenHeader,
    claims: Claims,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("raw", &"[REDACTED]")
            .field("header", &self.header)
            .field("claims", &self.claims)
            .finish()
    }
}

impl Token {
    /// The compact token string.
    pub fn raw(&self) -> &SecretString {
        &self.raw
    }

    /// Decoded JOSE header.
    pub fn header(&self) -> &TokenHeader {
        &self.header
    }

    /// Verified claims.
    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    /// Consume the token, keeping only its claims.
    pub fn into_claims(self) -> Claims {
        self.claims
    }

    /// Whether the token is still inside its validity window at `now`, with
    /// `margin` seconds to spare before `exp`.
    pub fn is_usable_at(&self, now: i64, margin: Duration) -> bool {
        let margin = i64::try_from(margin.as_secs()).unwrap_or(i64::MAX);
        let not_before_ok = self.claims.nbf.map_or(true, |nbf| now >= nbf);
        not_before_ok && now.saturating_add(margin) < self.claims.exp
    }
}

/// RS256 token verifier bound to one issuer.
pub struct TokenVerifier {
    /// Key resolver.
    jwks: Arc<JwksClient>,

    /// Expected `iss` value (normalized issuer domain).
    issuer: String,

    /// Clock skew tolerance for the `iat` check.
    clock_skew: Duration,
}

impl TokenVerifier {
    /// Create a new verifier.
    ///
    /// # Arguments
    ///
    /// * `jwks` - Key resolver holding the provider's signing keys
    /// * `issuer` - Expected `iss` claim
    /// * `clock_skew` - Tolerance for `iat` in the future
    pub fn new(jwks: Arc<JwksClient>, issuer: String, clock_skew: Duration) -> Self {
        Self {
            jwks,
            issuer,
            clock_skew,
        }
    }

    /// The expected `iss` claim.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// The key resolver this verifier uses.
    pub fn jwks(&self) -> &Arc<JwksClient> {
        &self.jwks
    }

    /// Verify `raw` for `expected_audience` at the current time.
    ///
    /// # Errors
    ///
    /// The first failing step, as a [`TokenError`].
    pub async fn verify(&self, raw: &str, expected_audience: &str) -> Result<Token, TokenError> {
        self.verify_at(raw, expected_audience, chrono::Utc::now().timestamp())
            .await
    }

    /// Verify `raw` for `expected_audience` at `now` (Unix seconds).
    ///
    /// # Steps
    ///
    /// 1. Size check and decode header and claims without trusting them
    /// 2. Require a `kid`
    /// 3. Require `alg` to be RS256
    /// 4. Look up the key, refreshing the key set once if it is unknown
    /// 5. Verify the signature
    /// 6. Validate claims against the issuer and `expected_audience`
    ///
    /// # Errors
    ///
    /// The first failing step, as a [`TokenError`].
    #[instrument(skip_all, fields(audience = %expected_audience))]
    pub async fn verify_at(
        &self,
        raw: &str,
        expected_audience: &str,
        now: i64,
    ) -> Result<Token, TokenError> {
        let result = self.verify_inner(raw, expected_audience, now).await;

        match &result {
            Ok(_) => {
                tracing::debug!(target: "idp.auth.jwt", "Token verified");
                metrics::record_token_validation("valid");
            }
            Err(e) => {
                tracing::debug!(target: "idp.auth.jwt", reason = e.kind(), error = %e, "Token rejected");
                metrics::record_token_validation(e.kind());
            }
        }

        result
    }

    async fn verify_inner(
        &self,
        raw: &str,
        expected_audience: &str,
        now: i64,
    ) -> Result<Token, TokenError> {
        let compact = CompactToken::parse(raw)?;
        let header: TokenHeader = compact.decode_header()?;
        let claims: Claims = compact.decode_payload()?;

        let kid = header.key_id().ok_or(TokenError::MissingKeyId)?;

        if header.alg != RS256 {
            return Err(TokenError::UnsupportedAlgorithm(header.alg.clone()));
        }

        let key = self.resolve_key(kid).await?;
        verify_signature(&compact, &key)?;

        validate_claims(
            &claims,
            &self.issuer,
            expected_audience,
            now,
            self.clock_skew,
        )?;

        Ok(Token {
            raw: SecretString::from(raw),
            header,
            claims,
        })
    }

    async fn resolve_key(&self, kid: &str) -> Result<SigningKey, TokenError> {
        match self.jwks.get_key(kid).await {
            Err(TokenError::KeyNotFound(_)) => {}
            other => return other,
        }

        tracing::info!(target: "idp.auth.jwt", kid = %kid, "Unknown key id, refreshing JWKS");

        match self.jwks.refresh().await {
            Ok(RefreshOutcome::Refreshed) | Ok(RefreshOutcome::Skipped) => {
                self.jwks.get_key(kid).await
            }
            Err(e) => {
                tracing::warn!(target: "idp.auth.jwt", kid = %kid, error = %e, "JWKS refresh failed");
                match self.jwks.get_key(kid).await {
                    Ok(key) => Ok(key),
                    Err(_) => Err(TokenError::KeySetUnavailable(e)),
                }
            }
        }
    }
}

/// Verify the RS256 signature over `header.payload`.
fn verify_signature(compact: &CompactToken<'_>, key: &SigningKey) -> Result<(), TokenError> {
    if let Some(alg) = key.algorithm() {
        if alg != RS256 {
            tracing::warn!(target: "idp.auth.jwt", kid = %key.kid(), alg = %alg, "Unexpected JWK algorithm");
            return Err(TokenError::UnsupportedAlgorithm(alg.to_string()));
        }
    }

    let valid = jsonwebtoken::crypto::verify(
        compact.signature(),
        compact.signing_input().as_bytes(),
        key.decoding_key(),
        Algorithm::RS256,
    )
    .map_err(|e| {
        tracing::debug!(target: "idp.auth.jwt", error = %e, "Signature could not be checked");
        TokenError::BadSignature
    })?;

    if valid {
        Ok(())
    } else {
        Err(TokenError::BadSignature)
    }
}
