//! Service configuration.
//!
//! Configuration is loaded from environment variables once at startup and is
//! read-only afterwards. The client secret is redacted in Debug output.
//!
//! The issuer domain is normalized to end with exactly one `/`. Endpoint paths
//! are appended to it without a leading slash, and the normalized value is
//! also the `iss` claim expected on every token.

use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default server bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default timeout for every outbound call to the identity provider.
pub const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 10;

/// Default minimum interval between key-set refreshes triggered by unknown kids.
pub const DEFAULT_JWKS_MIN_REFRESH_SECONDS: u64 = 30;

/// Service configuration.
#[derive(Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Identity provider domain, normalized with a trailing slash
    /// (e.g. `https://tenant.eu.auth0.com/`).
    pub issuer_domain: String,

    /// Identifier of the API protected by this service; the audience inbound
    /// tokens must carry and the `Application` audience for outbound tokens.
    pub api_identifier: String,

    /// OAuth client ID for the client-credentials grant.
    pub client_id: String,

    /// OAuth client secret.
    pub client_secret: SecretString,

    /// Clock skew tolerance in seconds for the `iat` check.
    pub jwt_clock_skew_seconds: i64,

    /// Timeout in seconds for outbound identity-provider calls.
    pub http_timeout_seconds: u64,

    /// Minimum seconds between key-set refreshes caused by unknown key IDs.
    pub jwks_min_refresh_seconds: u64,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("issuer_domain", &self.issuer_domain)
            .field("api_identifier", &self.api_identifier)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("jwt_clock_skew_seconds", &self.jwt_clock_skew_seconds)
            .field("http_timeout_seconds", &self.http_timeout_seconds)
            .field("jwks_min_refresh_seconds", &self.jwks_min_refresh_seconds)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid issuer domain: {0}")]
    InvalidIssuerDomain(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid HTTP timeout configuration: {0}")]
    InvalidHttpTimeout(String),

    #[error("Invalid JWKS refresh interval configuration: {0}")]
    InvalidJwksRefreshInterval(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let issuer_domain = normalize_issuer_domain(required(vars, "AUTH0_ISS_DOMAIN")?)?;
        let api_identifier = required(vars, "AUTH0_AUD_API_IDENTIFIER")?.to_string();
        let client_id = required(vars, "AUTH0_CLIENT_ID")?.to_string();
        let client_secret = SecretString::from(required(vars, "AUTH0_CLIENT_SECRET")?);

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let jwt_clock_skew_seconds = if let Some(value_str) = vars.get("JWT_CLOCK_SKEW_SECONDS") {
            let value: i64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be a valid integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value <= 0 {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be positive, got {}",
                    value
                )));
            }

            if value > MAX_CLOCK_SKEW.as_secs() as i64 {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
                    MAX_CLOCK_SKEW.as_secs(),
                    value
                )));
            }

            value
        } else {
            DEFAULT_CLOCK_SKEW.as_secs() as i64
        };

        let http_timeout_seconds = if let Some(value_str) = vars.get("IDP_HTTP_TIMEOUT_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidHttpTimeout(format!(
                    "IDP_HTTP_TIMEOUT_SECONDS must be a valid positive integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value == 0 {
                return Err(ConfigError::InvalidHttpTimeout(
                    "IDP_HTTP_TIMEOUT_SECONDS must be greater than 0".to_string(),
                ));
            }

            value
        } else {
            DEFAULT_HTTP_TIMEOUT_SECONDS
        };

        let jwks_min_refresh_seconds = match vars.get("JWKS_MIN_REFRESH_SECONDS") {
            Some(value_str) => value_str.parse().map_err(|e| {
                ConfigError::InvalidJwksRefreshInterval(format!(
                    "JWKS_MIN_REFRESH_SECONDS must be a valid non-negative integer, got '{}': {}",
                    value_str, e
                ))
            })?,
            None => DEFAULT_JWKS_MIN_REFRESH_SECONDS,
        };

        Ok(Config {
            bind_address,
            issuer_domain,
            api_identifier,
            client_id,
            client_secret,
            jwt_clock_skew_seconds,
            http_timeout_seconds,
            jwks_min_refresh_seconds,
        })
    }

    /// The `iss` value every accepted token must carry.
    pub fn expected_issuer(&self) -> &str {
        &self.issuer_domain
    }

    /// Well-known JWKS document URL.
    pub fn jwks_url(&self) -> String {
        format!("{}.well-known/jwks.json", self.issuer_domain)
    }

    /// OAuth token endpoint URL.
    pub fn token_url(&self) -> String {
        format!("{}oauth/token", self.issuer_domain)
    }

    /// Audience identifying the provider's own management API.
    pub fn management_audience(&self) -> String {
        format!("{}api/v2/", self.issuer_domain)
    }

    /// Database-connection signup endpoint URL.
    pub fn signup_url(&self) -> String {
        format!("{}dbconnections/signup", self.issuer_domain)
    }

    /// Management API users collection URL (without trailing slash).
    pub fn users_url(&self) -> String {
        format!("{}api/v2/users", self.issuer_domain)
    }

    /// Timeout applied to outbound identity-provider calls.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    /// Minimum interval between key-set refreshes.
    pub fn jwks_min_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.jwks_min_refresh_seconds)
    }

    /// Clock skew tolerance for the `iat` check.
    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.jwt_clock_skew_seconds.unsigned_abs())
    }
}

fn required<'a>(vars: &'a HashMap<String, String>, name: &str) -> Result<&'a str, ConfigError> {
    vars.get(name)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

/// Normalize an issuer domain to `scheme://host[:port]/[path/]`.
///
/// Accepts values with or without a trailing slash; extra trailing slashes
/// are collapsed into one.
fn normalize_issuer_domain(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    if !(trimmed.starts_with("https://") || trimmed.starts_with("http://")) {
        return Err(ConfigError::InvalidIssuerDomain(format!(
            "AUTH0_ISS_DOMAIN must start with https:// or http://, got '{}'",
            trimmed
        )));
    }

    let without_slash = trimmed.trim_end_matches('/');
    if without_slash.ends_with(':') || without_slash.ends_with("//") {
        return Err(ConfigError::InvalidIssuerDomain(format!(
            "AUTH0_ISS_DOMAIN has no host, got '{}'",
            trimmed
        )));
    }

    Ok(format!("{}/", without_slash))
}
