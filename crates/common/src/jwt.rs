//! Compact JWT decoding utilities.
//!
//! Splits a compact token (`header.payload.signature`) into its segments and
//! decodes the base64url JSON segments without trusting the signature. The
//! signature itself is verified elsewhere, against a key resolved from the
//! identity provider's JWKS.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE splitting or decoding (DoS prevention)
//! - Nothing returned here is trusted; callers must verify the signature
//!   before acting on decoded claims
//! - Errors carry the failing segment and decoder message for server-side
//!   diagnostics; callers decide what (if anything) is echoed to clients
//!
//! # Usage
//!
//! ```rust
//! use common::jwt::{CompactToken, TokenHeader};
//!
//! let token = "eyJhbGciOiJSUzI1NiIsImtpZCI6ImsxIn0.e30.c2ln";
//! let compact = CompactToken::parse(token).unwrap();
//! let header: TokenHeader = compact.decode_header().unwrap();
//! assert_eq!(header.kid.as_deref(), Some("k1"));
//! assert_eq!(compact.signing_input(), "eyJhbGciOiJSUzI1NiIsImtpZCI6ImsxIn0.e30");
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// Provider access tokens are typically under 2KB even with a long permission
/// list. Anything larger is rejected before base64 decoding allocates.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default clock skew tolerance for the `iat` check (5 minutes).
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Upper bound for a configured clock skew tolerance (10 minutes).
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

/// The only signing algorithm accepted for access tokens.
pub const RS256: &str = "RS256";

// =============================================================================
// Error Types
// =============================================================================

/// Errors produced while decoding a compact token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtFormatError {
    /// Token size exceeds [`MAX_JWT_SIZE_BYTES`].
    #[error("token is {0} bytes, exceeding the maximum allowed size")]
    TokenTooLarge(usize),

    /// Token does not have exactly three dot-separated segments.
    #[error("expected 3 token segments, found {0}")]
    WrongSegmentCount(usize),

    /// A segment is empty.
    #[error("token {0} segment is empty")]
    EmptySegment(&'static str),

    /// A segment is not valid base64url.
    #[error("token {segment} segment is not valid base64url: {reason}")]
    InvalidBase64 {
        segment: &'static str,
        reason: String,
    },

    /// A segment decoded to bytes that are not the expected JSON object.
    #[error("token {segment} segment is not valid JSON: {reason}")]
    InvalidJson {
        segment: &'static str,
        reason: String,
    },
}

// =============================================================================
// Header
// =============================================================================

/// JOSE header of a compact token.
///
/// `alg` is kept as a raw string so that unknown or hostile values (`none`,
/// `HS256`, ...) decode successfully and can be rejected with a precise error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHeader {
    /// Declared signing algorithm.
    pub alg: String,

    /// Key identifier selecting the JWKS entry used to sign.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Media type, usually `JWT`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
}

impl TokenHeader {
    /// The key identifier, treating an empty string as absent.
    #[must_use]
    pub fn key_id(&self) -> Option<&str> {
        self.kid.as_deref().filter(|kid| !kid.is_empty())
    }
}

// =============================================================================
// Compact Token
// =============================================================================

/// A compact token split into its three segments.
///
/// Borrowed from the raw token string; no decoding happens until
/// [`CompactToken::decode_header`] or [`CompactToken::decode_payload`] is called.
#[derive(Debug, Clone, Copy)]
pub struct CompactToken<'a> {
    header: &'a str,
    payload: &'a str,
    signature: &'a str,
    signing_input: &'a str,
}

impl<'a> CompactToken<'a> {
    /// Split a raw token into segments.
    ///
    /// # Errors
    ///
    /// - `TokenTooLarge` - token exceeds [`MAX_JWT_SIZE_BYTES`] (checked first)
    /// - `WrongSegmentCount` - not exactly three segments
    /// - `EmptySegment` - header, payload or signature is empty
    pub fn parse(token: &'a str) -> Result<Self, JwtFormatError> {
        if token.len() > MAX_JWT_SIZE_BYTES {
            tracing::debug!(
                target: "common.jwt",
                token_size = token.len(),
                max_size = MAX_JWT_SIZE_BYTES,
                "Token rejected: size exceeds maximum allowed"
            );
            return Err(JwtFormatError::TokenTooLarge(token.len()));
        }

        let mut parts = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            let count = token.split('.').count();
            tracing::debug!(target: "common.jwt", parts = count, "Token rejected: invalid JWT format");
            return Err(JwtFormatError::WrongSegmentCount(count));
        };

        for (name, segment) in [
            ("header", header),
            ("payload", payload),
            ("signature", signature),
        ] {
            if segment.is_empty() {
                return Err(JwtFormatError::EmptySegment(name));
            }
        }

        let signing_input = token
            .rsplit_once('.')
            .map(|(input, _)| input)
            .ok_or(JwtFormatError::WrongSegmentCount(1))?;

        Ok(Self {
            header,
            payload,
            signature,
            signing_input,
        })
    }

    /// Decode the header segment.
    ///
    /// # Errors
    ///
    /// Returns `InvalidBase64` or `InvalidJson` for the `header` segment.
    pub fn decode_header<T: DeserializeOwned>(&self) -> Result<T, JwtFormatError> {
        decode_segment("header", self.header)
    }

    /// Decode the payload (claims) segment.
    ///
    /// # Errors
    ///
    /// Returns `InvalidBase64` or `InvalidJson` for the `payload` segment.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, JwtFormatError> {
        decode_segment("payload", self.payload)
    }

    /// The base64url signature segment, still encoded.
    #[must_use]
    pub fn signature(&self) -> &'a str {
        self.signature
    }

    /// The bytes the signature was computed over (`header.payload`).
    #[must_use]
    pub fn signing_input(&self) -> &'a str {
        self.signing_input
    }
}

fn decode_segment<T: DeserializeOwned>(
    segment: &'static str,
    encoded: &str,
) -> Result<T, JwtFormatError> {
    let bytes = URL_SAFE_NO_PAD.decode(encoded).map_err(|e| {
        tracing::debug!(target: "common.jwt", segment, error = %e, "Failed to decode JWT segment base64");
        JwtFormatError::InvalidBase64 {
            segment,
            reason: e.to_string(),
        }
    })?;

    serde_json::from_slice(&bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", segment, error = %e, "Failed to parse JWT segment JSON");
        JwtFormatError::InvalidJson {
            segment,
            reason: e.to_string(),
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn encode(json: &str) -> String {
        URL_SAFE_NO_PAD.encode(json.as_bytes())
    }

    fn token_with(header: &str, payload: &str) -> String {
        format!("{}.{}.c2lnbmF0dXJl", encode(header), encode(payload))
    }

    #[test]
    fn test_parse_and_decode_header() {
        let token = token_with(
            r#"{"alg":"RS256","typ":"JWT","kid":"key-1"}"#,
            r#"{"sub":"abc"}"#,
        );

        let compact = CompactToken::parse(&token).unwrap();
        let header: TokenHeader = compact.decode_header().unwrap();

        assert_eq!(header.alg, "RS256");
        assert_eq!(header.key_id(), Some("key-1"));
        assert_eq!(header.typ.as_deref(), Some("JWT"));
        assert_eq!(compact.signature(), "c2lnbmF0dXJl");
    }

    #[test]
    fn test_signing_input_excludes_signature() {
        let token = token_with(r#"{"alg":"RS256"}"#, r#"{}"#);
        let compact = CompactToken::parse(&token).unwrap();

        let expected = format!("{}.{}", encode(r#"{"alg":"RS256"}"#), encode("{}"));
        assert_eq!(compact.signing_input(), expected);
    }

    #[test]
    fn test_wrong_segment_counts() {
        assert_eq!(
            CompactToken::parse("only.two").unwrap_err(),
            JwtFormatError::WrongSegmentCount(2)
        );
        assert_eq!(
            CompactToken::parse("a.b.c.d").unwrap_err(),
            JwtFormatError::WrongSegmentCount(4)
        );
        assert_eq!(
            CompactToken::parse("single").unwrap_err(),
            JwtFormatError::WrongSegmentCount(1)
        );
    }

    #[test]
    fn test_empty_segments_rejected() {
        assert_eq!(
            CompactToken::parse(".payload.sig").unwrap_err(),
            JwtFormatError::EmptySegment("header")
        );
        assert_eq!(
            CompactToken::parse("header..sig").unwrap_err(),
            JwtFormatError::EmptySegment("payload")
        );
        assert_eq!(
            CompactToken::parse("header.payload.").unwrap_err(),
            JwtFormatError::EmptySegment("signature")
        );
    }

    #[test]
    fn test_size_checked_before_parsing() {
        let token = "a".repeat(MAX_JWT_SIZE_BYTES + 1);
        assert_eq!(
            CompactToken::parse(&token).unwrap_err(),
            JwtFormatError::TokenTooLarge(MAX_JWT_SIZE_BYTES + 1)
        );
    }

    #[test]
    fn test_token_at_size_limit_is_parsed() {
        let header = encode(r#"{"alg":"RS256"}"#);
        let filler = "a".repeat(MAX_JWT_SIZE_BYTES - header.len() - 6);
        let token = format!("{header}.{filler}.sigs");
        assert_eq!(token.len(), MAX_JWT_SIZE_BYTES);
        assert!(CompactToken::parse(&token).is_ok());
    }

    #[test]
    fn test_invalid_base64_header() {
        let compact = CompactToken::parse("!!!invalid!!!.payload.sig").unwrap();
        let err = compact.decode_header::<TokenHeader>().unwrap_err();
        assert!(matches!(
            err,
            JwtFormatError::InvalidBase64 {
                segment: "header",
                ..
            }
        ));
    }

    #[test]
    fn test_truncated_payload_is_invalid_json() {
        let payload = encode(r#"{"sub":"abc","exp":12"#);
        let token = format!("{}.{}.sig", encode(r#"{"alg":"RS256"}"#), payload);
        let compact = CompactToken::parse(&token).unwrap();

        let err = compact.decode_payload::<serde_json::Value>().unwrap_err();
        assert!(matches!(
            err,
            JwtFormatError::InvalidJson {
                segment: "payload",
                ..
            }
        ));
    }

    #[test]
    fn test_header_without_alg_is_invalid() {
        let token = token_with(r#"{"kid":"k"}"#, "{}");
        let compact = CompactToken::parse(&token).unwrap();
        assert!(compact.decode_header::<TokenHeader>().is_err());
    }

    #[test]
    fn test_empty_kid_treated_as_absent() {
        let header = TokenHeader {
            alg: RS256.to_string(),
            kid: Some(String::new()),
            typ: None,
        };
        assert_eq!(header.key_id(), None);
    }

    #[test]
    fn test_numeric_kid_fails_to_decode() {
        let token = token_with(r#"{"alg":"RS256","kid":12345}"#, "{}");
        let compact = CompactToken::parse(&token).unwrap();
        assert!(compact.decode_header::<TokenHeader>().is_err());
    }

    #[test]
    fn test_clock_skew_constants() {
        assert_eq!(DEFAULT_CLOCK_SKEW.as_secs(), 300);
        assert!(DEFAULT_CLOCK_SKEW <= MAX_CLOCK_SKEW);
    }
}
