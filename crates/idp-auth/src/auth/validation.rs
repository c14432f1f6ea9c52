//! Claim validation.
//!
//! Pure functions checking the time bounds and identity claims of decoded
//! access tokens. Nothing here touches the network or the clock; callers pass
//! `now` explicitly.
//!
//! Checks run in a fixed order (`exp`, `nbf`, `iat`, `iss`, `aud`) and the
//! first failure wins, so an expired token is always reported as expired.

use crate::auth::claims::{Audience, Claims};
use std::time::Duration;
use subtle::{Choice, ConstantTimeEq};
use thiserror::Error;

/// Reasons a decoded claim set is rejected.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ClaimsError {
    #[error("token has expired")]
    Expired,

    #[error("token is not yet valid")]
    NotYetValid,

    #[error("token was issued in the future")]
    IssuedInFuture,

    #[error("token issuer does not match")]
    InvalidIssuer,

    #[error("token audience does not match")]
    InvalidAudience,
}

/// Validate every claim of `claims` against the expected issuer and audience.
///
/// # Errors
///
/// Returns the first failing check in `exp`, `nbf`, `iat`, `iss`, `aud` order.
pub fn validate_claims(
    claims: &Claims,
    expected_issuer: &str,
    expected_audience: &str,
    now: i64,
    clock_skew: Duration,
) -> Result<(), ClaimsError> {
    validate_time_bounds(claims, now, clock_skew)?;
    validate_issuer(claims.iss.as_deref(), expected_issuer)?;
    validate_audience(claims.aud.as_ref(), expected_audience)
}

/// Validate `exp`, `nbf` and `iat` against `now` (Unix seconds).
///
/// `exp` is exclusive: a token is expired at the second it names. An absent
/// `nbf` or `iat` imposes no constraint. `iat` may lie up to `clock_skew`
/// in the future.
///
/// # Errors
///
/// `Expired`, `NotYetValid` or `IssuedInFuture`.
pub fn validate_time_bounds(
    claims: &Claims,
    now: i64,
    clock_skew: Duration,
) -> Result<(), ClaimsError> {
    if now >= claims.exp {
        return Err(ClaimsError::Expired);
    }

    if let Some(nbf) = claims.nbf {
        if now < nbf {
            return Err(ClaimsError::NotYetValid);
        }
    }

    if let Some(iat) = claims.iat {
        let skew = i64::try_from(clock_skew.as_secs()).unwrap_or(i64::MAX);
        if iat > now.saturating_add(skew) {
            return Err(ClaimsError::IssuedInFuture);
        }
    }

    Ok(())
}

/// Validate `iss` by exact string equality.
///
/// # Errors
///
/// `InvalidIssuer` when absent or different.
pub fn validate_issuer(iss: Option<&str>, expected_issuer: &str) -> Result<(), ClaimsError> {
    match iss {
        Some(iss) if iss == expected_issuer => Ok(()),
        _ => Err(ClaimsError::InvalidIssuer),
    }
}

/// Validate that `expected_audience` is present in `aud`.
///
/// A single audience is compared by exact equality. A list is searched with
/// [`contains_constant_time`], which compares every element before deciding.
///
/// # Errors
///
/// `InvalidAudience` when absent, of an unsupported shape, or not matching.
pub fn validate_audience(
    aud: Option<&Audience>,
    expected_audience: &str,
) -> Result<(), ClaimsError> {
    let matched = match aud {
        Some(Audience::Single(value)) => value == expected_audience,
        Some(Audience::Multiple(values)) => {
            contains_constant_time(values, expected_audience, |a, b| a.ct_eq(b))
        }
        None => false,
    };

    if matched {
        Ok(())
    } else {
        Err(ClaimsError::InvalidAudience)
    }
}

/// Membership test that compares `expected` against every candidate.
///
/// Results are OR-accumulated as [`Choice`] values; there is no early return,
/// so the number of comparisons does not depend on where (or whether) a
/// match occurs. `eq` is a parameter so tests can observe every comparison.
pub fn contains_constant_time<F>(candidates: &[String], expected: &str, mut eq: F) -> bool
where
    F: FnMut(&[u8], &[u8]) -> Choice,
{
    let mut found = Choice::from(0u8);
    for candidate in candidates {
        found |= eq(candidate.as_bytes(), expected.as_bytes());
    }
    found.into()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const ISSUER: &str = "https://tenant.example.com/";
    const API: &str = "https://api.example.com";
    const NOW: i64 = 1_700_000_000;
    const SKEW: Duration = Duration::from_secs(300);

    fn claims(json: serde_json::Value) -> Claims {
        serde_json::from_value(json).expect("claims should decode")
    }

    fn valid_claims() -> serde_json::Value {
        serde_json::json!({
            "iss": ISSUER,
            "sub": "auth0|user",
            "aud": API,
            "iat": NOW - 10,
            "exp": NOW + 3600,
        })
    }

    fn with(field: &str, value: serde_json::Value) -> Claims {
        let mut json = valid_claims();
        json[field] = value;
        claims(json)
    }

    // =========================================================================
    // Time bounds
    // =========================================================================

    #[test]
    fn test_valid_claims_accepted() {
        let c = claims(valid_claims());
        assert_eq!(validate_claims(&c, ISSUER, API, NOW, SKEW), Ok(()));
    }

    #[test]
    fn test_exp_is_exclusive() {
        let c = with("exp", serde_json::json!(NOW));
        assert_eq!(
            validate_claims(&c, ISSUER, API, NOW, SKEW),
            Err(ClaimsError::Expired)
        );

        let c = with("exp", serde_json::json!(NOW + 1));
        assert_eq!(validate_claims(&c, ISSUER, API, NOW, SKEW), Ok(()));
    }

    #[test]
    fn test_nbf_in_future_rejected() {
        let c = with("nbf", serde_json::json!(NOW + 1));
        assert_eq!(
            validate_claims(&c, ISSUER, API, NOW, SKEW),
            Err(ClaimsError::NotYetValid)
        );
    }

    #[test]
    fn test_nbf_now_accepted() {
        let c = with("nbf", serde_json::json!(NOW));
        assert_eq!(validate_claims(&c, ISSUER, API, NOW, SKEW), Ok(()));
    }

    #[test]
    fn test_iat_within_skew_accepted() {
        let c = with("iat", serde_json::json!(NOW + 300));
        assert_eq!(validate_claims(&c, ISSUER, API, NOW, SKEW), Ok(()));
    }

    #[test]
    fn test_iat_beyond_skew_rejected() {
        let c = with("iat", serde_json::json!(NOW + 301));
        assert_eq!(
            validate_claims(&c, ISSUER, API, NOW, SKEW),
            Err(ClaimsError::IssuedInFuture)
        );
    }

    #[test]
    fn test_expired_wins_over_every_other_violation() {
        let c = claims(serde_json::json!({
            "iss": "https://evil.example.com/",
            "aud": "https://other.example.com",
            "nbf": NOW + 100,
            "iat": NOW + 10_000,
            "exp": NOW - 1,
        }));
        assert_eq!(
            validate_claims(&c, ISSUER, API, NOW, SKEW),
            Err(ClaimsError::Expired)
        );
    }

    #[test]
    fn test_issuer_checked_before_audience() {
        let c = claims(serde_json::json!({
            "iss": "https://evil.example.com/",
            "aud": "https://other.example.com",
            "exp": NOW + 60,
        }));
        assert_eq!(
            validate_claims(&c, ISSUER, API, NOW, SKEW),
            Err(ClaimsError::InvalidIssuer)
        );
    }

    // =========================================================================
    // Issuer
    // =========================================================================

    #[test]
    fn test_issuer_exact_match_only() {
        assert_eq!(validate_issuer(Some(ISSUER), ISSUER), Ok(()));
        assert_eq!(
            validate_issuer(Some("https://tenant.example.com"), ISSUER),
            Err(ClaimsError::InvalidIssuer)
        );
        assert_eq!(
            validate_issuer(None, ISSUER),
            Err(ClaimsError::InvalidIssuer)
        );
    }

    // =========================================================================
    // Audience
    // =========================================================================

    #[test]
    fn test_single_audience() {
        let aud = Audience::Single(API.to_string());
        assert_eq!(validate_audience(Some(&aud), API), Ok(()));
        assert_eq!(
            validate_audience(Some(&aud), "https://other"),
            Err(ClaimsError::InvalidAudience)
        );
    }

    #[test]
    fn test_multiple_audience_membership() {
        let aud = Audience::Multiple(vec![
            API.to_string(),
            "https://tenant.example.com/userinfo".to_string(),
        ]);
        assert_eq!(validate_audience(Some(&aud), API), Ok(()));
        assert_eq!(
            validate_audience(Some(&aud), "https://tenant.example.com/userinfo"),
            Ok(())
        );
        assert_eq!(
            validate_audience(Some(&aud), "https://api.example"),
            Err(ClaimsError::InvalidAudience)
        );
    }

    #[test]
    fn test_empty_audience_list_rejected() {
        let aud = Audience::Multiple(vec![]);
        assert_eq!(
            validate_audience(Some(&aud), API),
            Err(ClaimsError::InvalidAudience)
        );
    }

    #[test]
    fn test_absent_or_wrong_shape_audience_rejected() {
        assert_eq!(
            validate_audience(None, API),
            Err(ClaimsError::InvalidAudience)
        );

        let c = with("aud", serde_json::json!(42));
        assert_eq!(
            validate_claims(&c, ISSUER, API, NOW, SKEW),
            Err(ClaimsError::InvalidAudience)
        );
    }

    #[test]
    fn test_membership_compares_every_candidate() {
        let candidates: Vec<String> = ["a", "b", API, "c", "d"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let mut comparisons = 0;
        let found = contains_constant_time(&candidates, API, |a, b| {
            comparisons += 1;
            a.ct_eq(b)
        });

        assert!(found);
        assert_eq!(
            comparisons,
            candidates.len(),
            "every candidate must be compared even after a match"
        );
    }

    #[test]
    fn test_membership_match_position_does_not_change_comparison_count() {
        let lists = [
            vec![API, "x", "y"],
            vec!["x", API, "y"],
            vec!["x", "y", API],
            vec!["x", "y", "z"],
        ];

        for list in lists {
            let candidates: Vec<String> = list.iter().map(|s| s.to_string()).collect();
            let mut comparisons = 0;
            contains_constant_time(&candidates, API, |a, b| {
                comparisons += 1;
                a.ct_eq(b)
            });
            assert_eq!(comparisons, 3);
        }
    }

    #[test]
    fn test_membership_prefix_is_not_a_match() {
        let candidates = vec!["https://api.example.com/extra".to_string()];
        assert!(!contains_constant_time(&candidates, API, |a, b| a.ct_eq(b)));
    }
}
