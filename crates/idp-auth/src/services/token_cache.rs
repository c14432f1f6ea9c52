//! Outbound access-token cache.
//!
//! Acquires client-credentials tokens from the provider's `oauth/token`
//! endpoint and caches one per target audience. Every acquired token is
//! verified with the [`TokenVerifier`] for the audience it was requested for
//! before it is cached or handed out.
//!
//! # Concurrency
//!
//! Each audience has its own async mutex, held across the network fetch. At
//! most one acquisition per audience is in flight; callers queued behind it
//! observe the freshly cached entry. Different audiences never block each
//! other beyond the brief slot lookup.
//!
//! # Expiry
//!
//! A cached token is refreshed once it is within the expiry margin of `exp`.
//! The margin never exceeds half the token's lifetime, so short-lived tokens
//! are still served from the cache.
//!
//! # Failure
//!
//! A failed acquisition leaves the cached token in place and is returned to
//! the calling request only. Nothing is retried internally. While the cached
//! token has not actually expired, callers arriving within
//! [`REFRESH_RETRY_INTERVAL`] of the failure are handed that token instead of
//! hitting the provider again.

use crate::auth::{Token, TokenError, TokenVerifier};
use crate::config::Config;
use crate::observability::metrics;
use crate::services::provider::read_error;
use chrono::{DateTime, Utc};
use common::secret::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::instrument;

/// Default margin before `exp` at which a cached token is considered stale.
pub const DEFAULT_EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// After a failed refresh, how long a still-valid cached token is handed out
/// before the next caller tries the provider again.
pub const REFRESH_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// OAuth grant type for machine-to-machine tokens.
const GRANT_TYPE: &str = "client_credentials";

// =============================================================================
// Error Types
// =============================================================================

/// Errors acquiring an outbound token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionError {
    /// Transport failure talking to the token endpoint.
    #[error("token request failed: {0}")]
    Network(String),

    /// The provider answered with a non-2xx status.
    #[error("token request rejected with status {status} ({code}): {message}")]
    Rejected {
        status: u16,
        code: String,
        message: String,
    },

    /// The success body could not be parsed.
    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    /// The acquired token failed verification for the requested audience.
    #[error("acquired token failed verification: {0}")]
    Verification(#[from] TokenError),
}

impl AcquisitionError {
    /// Bounded label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AcquisitionError::Network(_) => "network",
            AcquisitionError::Rejected { .. } => "rejected",
            AcquisitionError::InvalidResponse(_) => "invalid_response",
            AcquisitionError::Verification(_) => "verification",
        }
    }
}

// =============================================================================
// Audience Keys
// =============================================================================

/// Target audience of an outbound token; the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TokenAudience {
    /// The provider's management API (`<issuer>api/v2/`).
    Management,

    /// The API identified by the configured API identifier.
    Application,

    /// Any other audience, verbatim.
    Custom(String),
}

impl TokenAudience {
    /// Bounded metrics label.
    pub fn label(&self) -> &'static str {
        match self {
            TokenAudience::Management => "management",
            TokenAudience::Application => "application",
            TokenAudience::Custom(_) => "custom",
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the token cache.
#[derive(Clone)]
pub struct TokenCacheConfig {
    /// Token endpoint URL (`<issuer>oauth/token`).
    pub token_url: String,

    /// OAuth client ID.
    pub client_id: String,

    /// OAuth client secret.
    pub client_secret: SecretString,

    /// Audience value for [`TokenAudience::Management`].
    pub management_audience: String,

    /// Audience value for [`TokenAudience::Application`].
    pub application_audience: String,

    /// How long before `exp` a cached token stops being handed out.
    pub expiry_margin: Duration,
}

impl fmt::Debug for TokenCacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCacheConfig")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("management_audience", &self.management_audience)
            .field("application_audience", &self.application_audience)
            .field("expiry_margin", &self.expiry_margin)
            .finish()
    }
}

impl TokenCacheConfig {
    /// Derive the cache configuration from the service configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            token_url: config.token_url(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            management_audience: config.management_audience(),
            application_audience: config.api_identifier.clone(),
            expiry_margin: DEFAULT_EXPIRY_MARGIN,
        }
    }

    /// Set a custom expiry margin.
    pub fn with_expiry_margin(mut self, margin: Duration) -> Self {
        self.expiry_margin = margin;
        self
    }

    /// The audience string sent to the provider for `audience`.
    pub fn resolve<'a>(&'a self, audience: &'a TokenAudience) -> &'a str {
        match audience {
            TokenAudience::Management => &self.management_audience,
            TokenAudience::Application => &self.application_audience,
            TokenAudience::Custom(value) => value,
        }
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Serialize)]
struct ClientCredentialsRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    audience: &'a str,
    grant_type: &'static str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

// =============================================================================
// Cache
// =============================================================================

/// A cached, verified outbound token.
#[derive(Debug, Clone)]
pub struct CachedCredential {
    /// Audience key the token was acquired for.
    pub audience: TokenAudience,

    /// The verified token.
    pub token: Arc<Token>,

    /// When the token was acquired.
    pub fetched_at: DateTime<Utc>,

    /// How long before `exp` this token stops being served as fresh.
    pub refresh_margin: Duration,

    /// When the last refresh attempt for this entry failed.
    pub refresh_failed_at: Option<Instant>,
}

impl CachedCredential {
    fn new(audience: TokenAudience, token: Arc<Token>, configured_margin: Duration) -> Self {
        let fetched_at = Utc::now();
        let claims = token.claims();
        let refresh_margin =
            refresh_margin(claims.iat, claims.exp, fetched_at.timestamp(), configured_margin);

        Self {
            audience,
            token,
            fetched_at,
            refresh_margin,
            refresh_failed_at: None,
        }
    }

    fn is_fresh_at(&self, now: i64) -> bool {
        self.token.is_usable_at(now, self.refresh_margin)
    }

    /// Still valid, and a refresh failed too recently to try again.
    fn is_fallback_at(&self, now: i64) -> bool {
        let backing_off = self
            .refresh_failed_at
            .is_some_and(|at| at.elapsed() < REFRESH_RETRY_INTERVAL);
        backing_off && self.token.is_usable_at(now, Duration::ZERO)
    }
}

/// The configured margin, capped at half of the token's lifetime.
///
/// Lifetime runs from `iat`, or from the fetch time if the token has none.
fn refresh_margin(iat: Option<i64>, exp: i64, fetched_at: i64, configured: Duration) -> Duration {
    let lifetime = exp.saturating_sub(iat.unwrap_or(fetched_at)).max(0);
    let cap = Duration::from_secs(u64::try_from(lifetime / 2).unwrap_or(0));
    configured.min(cap)
}

type Slot = Arc<Mutex<Option<CachedCredential>>>;

/// Per-audience cache of client-credentials tokens.
pub struct TokenCache {
    config: TokenCacheConfig,
    verifier: Arc<TokenVerifier>,
    http_client: reqwest::Client,
    slots: Mutex<HashMap<TokenAudience, Slot>>,
}

impl TokenCache {
    /// Create an empty cache.
    pub fn new(
        config: TokenCacheConfig,
        verifier: Arc<TokenVerifier>,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            config,
            verifier,
            http_client,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Return a valid token for `audience`, acquiring one if needed.
    ///
    /// A cached token is returned without any network call while it is more
    /// than its refresh margin away from `exp` (re-checked on every call).
    ///
    /// # Errors
    ///
    /// Any [`AcquisitionError`]; the cached token is left in place.
    #[instrument(skip_all, fields(audience = audience.label()))]
    pub async fn get_token(&self, audience: &TokenAudience) -> Result<Arc<Token>, AcquisitionError> {
        let slot = self.slot(audience).await;
        let mut entry = slot.lock().await;

        let now = Utc::now().timestamp();
        if let Some(cached) = entry.as_ref() {
            if cached.is_fresh_at(now) {
                tracing::debug!(target: "idp.token_cache", audience = audience.label(), "Token cache hit");
                metrics::record_token_cache_lookup(audience.label(), true);
                return Ok(Arc::clone(&cached.token));
            }

            if cached.is_fallback_at(now) {
                tracing::debug!(
                    target: "idp.token_cache",
                    audience = audience.label(),
                    "Refresh recently failed, serving still-valid cached token"
                );
                metrics::record_token_cache_lookup(audience.label(), true);
                return Ok(Arc::clone(&cached.token));
            }
        }

        metrics::record_token_cache_lookup(audience.label(), false);

        match self.acquire(audience).await {
            Ok(token) => {
                let token = Arc::new(token);
                *entry = Some(CachedCredential::new(
                    audience.clone(),
                    Arc::clone(&token),
                    self.config.expiry_margin,
                ));
                Ok(token)
            }
            Err(e) => {
                if let Some(cached) = entry.as_mut() {
                    cached.refresh_failed_at = Some(Instant::now());
                }
                Err(e)
            }
        }
    }

    /// Drop the cached token for `audience`, forcing the next call to refetch.
    ///
    /// An idle slot is removed from the cache entirely. A slot another caller
    /// is using is emptied instead, after its in-flight acquisition finishes.
    pub async fn clear(&self, audience: &TokenAudience) {
        let in_use = {
            let mut slots = self.slots.lock().await;
            let idle = match slots.get(audience) {
                Some(slot) => Arc::strong_count(slot) == 1,
                None => return,
            };
            if idle {
                slots.remove(audience);
                None
            } else {
                slots.get(audience).cloned()
            }
        };

        if let Some(slot) = in_use {
            *slot.lock().await = None;
        }
        tracing::debug!(target: "idp.token_cache", audience = audience.label(), "Cached token cleared");
    }

    /// Drop every cached token.
    pub async fn clear_all(&self) {
        let in_use: Vec<Slot> = {
            let mut slots = self.slots.lock().await;
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            slots.values().cloned().collect()
        };
        for slot in in_use {
            *slot.lock().await = None;
        }
        tracing::debug!(target: "idp.token_cache", "All cached tokens cleared");
    }

    /// Number of audiences currently holding a slot.
    pub async fn slot_count(&self) -> usize {
        self.slots.lock().await.len()
    }

    /// Snapshot of the cached entry for `audience`, if any.
    pub async fn cached(&self, audience: &TokenAudience) -> Option<CachedCredential> {
        let slot = self.slots.lock().await.get(audience).cloned()?;
        let cached = slot.lock().await.clone();
        cached
    }

    async fn slot(&self, audience: &TokenAudience) -> Slot {
        let mut slots = self.slots.lock().await;
        Arc::clone(slots.entry(audience.clone()).or_default())
    }

    /// Request and verify a new token. Does not touch the cache.
    async fn acquire(&self, audience: &TokenAudience) -> Result<Token, AcquisitionError> {
        let start = Instant::now();
        let result = self.acquire_inner(audience).await;

        let status = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        metrics::record_token_acquisition(audience.label(), status, start.elapsed());

        if let Err(e) = &result {
            tracing::warn!(
                target: "idp.token_cache",
                audience = audience.label(),
                error = %e,
                "Token acquisition failed"
            );
        }

        result
    }

    async fn acquire_inner(&self, audience: &TokenAudience) -> Result<Token, AcquisitionError> {
        let resolved = self.config.resolve(audience);

        tracing::debug!(
            target: "idp.token_cache",
            client_id = %self.config.client_id,
            audience = %resolved,
            "Requesting client-credentials token"
        );

        let request = ClientCredentialsRequest {
            client_id: &self.config.client_id,
            client_secret: self.config.client_secret.expose_secret(),
            audience: resolved,
            grant_type: GRANT_TYPE,
        };

        let response = self
            .http_client
            .post(&self.config.token_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AcquisitionError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let (status, code, message) = read_error(response)
                .await
                .map_err(|e| AcquisitionError::Network(e.to_string()))?;
            return Err(AcquisitionError::Rejected {
                status,
                code,
                message,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AcquisitionError::Network(e.to_string()))?;

        let token_response: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| AcquisitionError::InvalidResponse(e.to_string()))?;

        let token = self
            .verifier
            .verify(&token_response.access_token, resolved)
            .await?;

        tracing::info!(
            target: "idp.token_cache",
            audience = audience.label(),
            expires_in_secs = ?token_response.expires_in,
            "Token acquired"
        );

        Ok(token)
    }
}
