//! Access-token claims.
//!
//! Contains the claims decoded from provider-issued access tokens. The `sub`
//! field is redacted in Debug output to prevent exposure in logs.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// The `aud` claim, decoded once into one of its two legal shapes.
///
/// Any other JSON shape (number, object, mixed array) decodes to `None` on
/// [`Claims::aud`] and is rejected by audience validation rather than by the
/// decoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    /// `"aud": "https://api.example.com"`
    Single(String),

    /// `"aud": ["https://api.example.com", "https://tenant/userinfo"]`
    Multiple(Vec<String>),
}

impl Audience {
    /// All audience values as a slice-like iterator.
    pub fn values(&self) -> impl Iterator<Item = &str> {
        let values: &[String] = match self {
            Audience::Single(value) => std::slice::from_ref(value),
            Audience::Multiple(values) => values,
        };
        values.iter().map(String::as_str)
    }
}

/// Claims carried by a provider access token.
///
/// `exp` is the only claim required to decode; identity claims are checked
/// by [`crate::auth::validation`] so that their absence is reported as a
/// validation failure with a precise reason.
#[derive(Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer (the provider domain with trailing slash).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Subject (user_id, or `<client_id>@clients` for machine tokens) -
    /// redacted in Debug output.
    #[serde(default)]
    pub sub: String,

    /// Audience, one value or many.
    #[serde(
        default,
        deserialize_with = "deserialize_audience",
        skip_serializing_if = "Option::is_none"
    )]
    pub aud: Option<Audience>,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Not-before timestamp (Unix epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,

    /// Issued-at timestamp (Unix epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Space-separated scopes granted to this token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Authorized party (the client the token was issued to).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azp: Option<String>,

    /// Grant type, `client-credentials` for machine tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gty: Option<String>,

    /// RBAC permissions, present when the API enables them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
}

impl fmt::Debug for Claims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claims")
            .field("iss", &self.iss)
            .field("sub", &"[REDACTED]")
            .field("aud", &self.aud)
            .field("exp", &self.exp)
            .field("nbf", &self.nbf)
            .field("iat", &self.iat)
            .field("scope", &self.scope)
            .field("azp", &self.azp)
            .field("gty", &self.gty)
            .field("permissions", &self.permissions)
            .finish()
    }
}

impl Claims {
    /// Check if the token has a specific scope.
    ///
    /// Scopes are space-separated in the JWT claims.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes().contains(&scope)
    }

    /// Get all scopes as a vector.
    pub fn scopes(&self) -> Vec<&str> {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().collect())
            .unwrap_or_default()
    }

    /// Check if the token grants `permission`, either as a scope or as an
    /// RBAC permission.
    pub fn grants(&self, permission: &str) -> bool {
        self.has_scope(permission) || self.permissions.iter().any(|p| p == permission)
    }
}

fn deserialize_audience<'de, D>(deserializer: D) -> Result<Option<Audience>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value::<Audience>(v).ok()))
}
