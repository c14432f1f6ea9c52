//! JWKS client for fetching and holding the identity provider's signing keys.
//!
//! The key set is fetched once at startup from
//! `<issuer>.well-known/jwks.json`; startup fails unless every RSA signing
//! key in the document materializes into a usable public key. Afterwards
//! the set is only replaced by an explicit [`JwksClient::refresh`], which the
//! verifier triggers when a token names an unknown `kid`.
//!
//! # Security
//!
//! - Refreshes are rate-limited by a minimum interval, so forged `kid` values
//!   cannot drive unbounded traffic to the provider
//! - Concurrent refresh requests collapse into a single fetch
//! - The key set is swapped atomically; readers see the old or the new set,
//!   never a partial one

use crate::auth::jwt::TokenError;
use crate::observability::metrics;
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::instrument;

/// Errors fetching or materializing a key set.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeySetError {
    /// The JWKS endpoint could not be reached or answered with a non-2xx status.
    #[error("failed to fetch key set: {0}")]
    NetworkFailure(String),

    /// The document is not a JWKS, or an RSA entry in it is unusable.
    #[error("malformed key set: {0}")]
    MalformedKeySet(String),
}

/// JSON Web Key from the JWKS endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type (`RSA` for the keys this service can use).
    pub kty: String,

    /// Key ID - used to select the correct key for verification.
    #[serde(default)]
    pub kid: Option<String>,

    /// Algorithm (should be `RS256`).
    #[serde(default)]
    pub alg: Option<String>,

    /// Key use (`sig` for signing).
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    /// RSA modulus (base64url encoded, big-endian).
    #[serde(default)]
    pub n: Option<String>,

    /// RSA public exponent (base64url encoded, big-endian).
    #[serde(default)]
    pub e: Option<String>,
}

/// JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksResponse {
    /// List of JSON Web Keys.
    pub keys: Vec<Jwk>,
}

/// A materialized RSA public key with its identifier.
#[derive(Clone)]
pub struct SigningKey {
    kid: String,
    algorithm: Option<String>,
    key: DecodingKey,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Key identifier.
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Algorithm advertised by the JWK, if any.
    pub fn algorithm(&self) -> Option<&str> {
        self.algorithm.as_deref()
    }

    /// Public key for signature verification.
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }
}

/// An ordered, immutable collection of signing keys.
#[derive(Debug, Clone)]
pub struct KeySet {
    keys: Vec<SigningKey>,
}

impl KeySet {
    /// Materialize every usable entry of a JWKS document.
    ///
    /// Entries that are not RSA, or are published for encryption, are skipped.
    ///
    /// # Errors
    ///
    /// `MalformedKeySet` if an RSA signing entry lacks `kid`, `n` or `e`, if
    /// its components do not form a public key, or if no usable key remains.
    pub fn from_jwks(jwks: JwksResponse) -> Result<Self, KeySetError> {
        let mut keys = Vec::with_capacity(jwks.keys.len());

        for jwk in jwks.keys {
            if jwk.kty != "RSA" || jwk.key_use.as_deref() == Some("enc") {
                tracing::debug!(
                    target: "idp.auth.jwks",
                    kty = %jwk.kty,
                    key_use = ?jwk.key_use,
                    "Skipping non-signing JWK"
                );
                continue;
            }

            let kid = jwk
                .kid
                .filter(|kid| !kid.is_empty())
                .ok_or_else(|| KeySetError::MalformedKeySet("RSA key without kid".to_string()))?;

            let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
                return Err(KeySetError::MalformedKeySet(format!(
                    "RSA key {} is missing modulus or exponent",
                    kid
                )));
            };

            let key = DecodingKey::from_rsa_components(n, e).map_err(|err| {
                KeySetError::MalformedKeySet(format!("RSA key {} is invalid: {}", kid, err))
            })?;

            keys.push(SigningKey {
                kid,
                algorithm: jwk.alg,
                key,
            });
        }

        if keys.is_empty() {
            return Err(KeySetError::MalformedKeySet(
                "key set contains no usable RSA signing keys".to_string(),
            ));
        }

        Ok(Self { keys })
    }

    /// Find the key with exactly this `kid`.
    ///
    /// # Errors
    ///
    /// `TokenError::KeyNotFound` when no key matches.
    pub fn lookup(&self, kid: &str) -> Result<&SigningKey, TokenError> {
        self.keys
            .iter()
            .find(|key| key.kid == kid)
            .ok_or_else(|| TokenError::KeyNotFound(kid.to_string()))
    }

    /// Key identifiers, in document order.
    pub fn kids(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|key| key.kid.as_str())
    }

    /// Number of keys in the set.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Always false for a constructed key set.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Fetch and materialize the key set at `jwks_url`.
///
/// # Errors
///
/// - `NetworkFailure` - transport error or non-2xx status
/// - `MalformedKeySet` - body is not a usable JWKS
#[instrument(skip(http_client), fields(url = %jwks_url))]
pub async fn fetch_key_set(
    http_client: &reqwest::Client,
    jwks_url: &str,
) -> Result<KeySet, KeySetError> {
    let start = Instant::now();
    let result = fetch_key_set_inner(http_client, jwks_url).await;

    let status = match &result {
        Ok(_) => "success",
        Err(KeySetError::NetworkFailure(_)) => "network_failure",
        Err(KeySetError::MalformedKeySet(_)) => "malformed",
    };
    metrics::record_jwks_fetch(status, start.elapsed());

    result
}

async fn fetch_key_set_inner(
    http_client: &reqwest::Client,
    jwks_url: &str,
) -> Result<KeySet, KeySetError> {
    tracing::debug!(target: "idp.auth.jwks", url = %jwks_url, "Fetching JWKS");

    let response = http_client.get(jwks_url).send().await.map_err(|e| {
        tracing::error!(target: "idp.auth.jwks", error = %e, "Failed to fetch JWKS");
        KeySetError::NetworkFailure(e.to_string())
    })?;

    let status = response.status();
    if !status.is_success() {
        tracing::error!(target: "idp.auth.jwks", status = %status, "JWKS endpoint returned error");
        return Err(KeySetError::NetworkFailure(format!(
            "JWKS endpoint returned {}",
            status
        )));
    }

    let body = response.bytes().await.map_err(|e| {
        tracing::error!(target: "idp.auth.jwks", error = %e, "Failed to read JWKS response");
        KeySetError::NetworkFailure(e.to_string())
    })?;

    let jwks: JwksResponse = serde_json::from_slice(&body).map_err(|e| {
        tracing::error!(target: "idp.auth.jwks", error = %e, "Failed to parse JWKS response");
        KeySetError::MalformedKeySet(e.to_string())
    })?;

    let key_set = KeySet::from_jwks(jwks).inspect_err(|e| {
        tracing::error!(target: "idp.auth.jwks", error = %e, "JWKS contains unusable keys");
    })?;

    tracing::info!(
        target: "idp.auth.jwks",
        key_count = key_set.len(),
        "JWKS loaded"
    );

    Ok(key_set)
}

/// Result of a [`JwksClient::refresh`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new key set was fetched and swapped in.
    Refreshed,

    /// The minimum refresh interval has not elapsed; nothing was fetched.
    Skipped,
}

/// JWKS client holding the current key set.
///
/// Thread-safe; lookups take a read lock only long enough to clone the
/// current `Arc<KeySet>`.
pub struct JwksClient {
    /// URL to the JWKS endpoint.
    jwks_url: String,

    /// HTTP client for fetching JWKS.
    http_client: reqwest::Client,

    /// Current key set.
    key_set: RwLock<Arc<KeySet>>,

    /// Time of the last refresh attempt. Held across the fetch so concurrent
    /// refreshes are serialized.
    last_refresh: Mutex<Option<Instant>>,

    /// Minimum interval between refresh attempts.
    min_refresh_interval: Duration,
}

impl JwksClient {
    /// Fetch the key set and build a client around it.
    ///
    /// # Errors
    ///
    /// Any [`KeySetError`] from the initial fetch; the client is never built
    /// with a partial or empty key set.
    pub async fn fetch(
        jwks_url: String,
        http_client: reqwest::Client,
        min_refresh_interval: Duration,
    ) -> Result<Self, KeySetError> {
        let key_set = fetch_key_set(&http_client, &jwks_url).await?;
        Ok(Self::with_key_set(
            jwks_url,
            http_client,
            key_set,
            min_refresh_interval,
        ))
    }

    /// Build a client around an already-fetched key set.
    pub fn with_key_set(
        jwks_url: String,
        http_client: reqwest::Client,
        key_set: KeySet,
        min_refresh_interval: Duration,
    ) -> Self {
        Self {
            jwks_url,
            http_client,
            key_set: RwLock::new(Arc::new(key_set)),
            last_refresh: Mutex::new(None),
            min_refresh_interval,
        }
    }

    /// Snapshot of the current key set.
    pub async fn current(&self) -> Arc<KeySet> {
        Arc::clone(&*self.key_set.read().await)
    }

    /// Get a signing key by key ID from the current key set.
    ///
    /// Does not refresh; see [`JwksClient::refresh`].
    ///
    /// # Errors
    ///
    /// `TokenError::KeyNotFound` if the current set has no such key.
    pub async fn get_key(&self, kid: &str) -> Result<SigningKey, TokenError> {
        let key_set = self.current().await;
        key_set.lookup(kid).cloned()
    }

    /// Re-fetch the key set and atomically swap it in, unless a refresh was
    /// attempted less than the minimum interval ago.
    ///
    /// Callers arriving while a refresh is in flight wait for it and then
    /// observe `Skipped` (with a non-zero interval) along with the new key set.
    /// A failed fetch still counts as an attempt and leaves the current set in
    /// place.
    ///
    /// # Errors
    ///
    /// Any [`KeySetError`] from the fetch.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<RefreshOutcome, KeySetError> {
        let mut last_refresh = self.last_refresh.lock().await;

        if let Some(at) = *last_refresh {
            if at.elapsed() < self.min_refresh_interval {
                tracing::debug!(
                    target: "idp.auth.jwks",
                    "JWKS refresh skipped: minimum interval not elapsed"
                );
                metrics::record_jwks_refresh_skipped();
                return Ok(RefreshOutcome::Skipped);
            }
        }

        *last_refresh = Some(Instant::now());
        self.swap_in_fresh_key_set().await?;
        Ok(RefreshOutcome::Refreshed)
    }

    /// Refresh regardless of the minimum interval.
    ///
    /// Still serialized with other refreshes.
    ///
    /// # Errors
    ///
    /// Any [`KeySetError`] from the fetch.
    pub async fn force_refresh(&self) -> Result<(), KeySetError> {
        let mut last_refresh = self.last_refresh.lock().await;
        *last_refresh = Some(Instant::now());
        self.swap_in_fresh_key_set().await
    }

    async fn swap_in_fresh_key_set(&self) -> Result<(), KeySetError> {
        let key_set = fetch_key_set(&self.http_client, &self.jwks_url).await?;

        tracing::info!(
            target: "idp.auth.jwks",
            key_count = key_set.len(),
            "JWKS key set replaced"
        );

        *self.key_set.write().await = Arc::new(key_set);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use idp_test_utils::crypto_fixtures::{PRIMARY_KEY, SECONDARY_KEY};

    fn rsa_jwk(kid: &str, n: &str) -> serde_json::Value {
        serde_json::json!({
            "kty": "RSA",
            "kid": kid,
            "use": "sig",
            "alg": "RS256",
            "n": n,
            "e": "AQAB",
        })
    }

    fn jwks(keys: Vec<serde_json::Value>) -> JwksResponse {
        serde_json::from_value(serde_json::json!({ "keys": keys })).unwrap()
    }

    #[test]
    fn test_jwk_deserialization() {
        let json = r#"{
            "kty": "RSA",
            "kid": "test-key-01",
            "use": "sig",
            "alg": "RS256",
            "n": "AQAB",
            "e": "AQAB",
            "x5t": "ignored"
        }"#;

        let jwk: Jwk = serde_json::from_str(json).unwrap();

        assert_eq!(jwk.kty, "RSA");
        assert_eq!(jwk.kid.as_deref(), Some("test-key-01"));
        assert_eq!(jwk.alg.as_deref(), Some("RS256"));
        assert_eq!(jwk.key_use.as_deref(), Some("sig"));
    }

    #[test]
    fn test_key_set_from_jwks() {
        let set = KeySet::from_jwks(jwks(vec![
            rsa_jwk("k1", PRIMARY_KEY.modulus),
            rsa_jwk("k2", SECONDARY_KEY.modulus),
        ]))
        .unwrap();

        assert_eq!(set.len(), 2);
        assert_eq!(set.kids().collect::<Vec<_>>(), vec!["k1", "k2"]);
        assert_eq!(set.lookup("k2").unwrap().kid(), "k2");
        assert_eq!(set.lookup("k1").unwrap().algorithm(), Some("RS256"));
    }

    #[test]
    fn test_lookup_is_exact_match() {
        let set = KeySet::from_jwks(jwks(vec![rsa_jwk("key-1", PRIMARY_KEY.modulus)])).unwrap();

        assert!(matches!(
            set.lookup("key-"),
            Err(TokenError::KeyNotFound(kid)) if kid == "key-"
        ));
        assert!(set.lookup("KEY-1").is_err());
        assert!(set.lookup("key-1").is_ok());
    }

    #[test]
    fn test_non_rsa_and_encryption_keys_are_skipped() {
        let set = KeySet::from_jwks(jwks(vec![
            serde_json::json!({"kty": "OKP", "kid": "ed", "crv": "Ed25519", "x": "AAAA"}),
            serde_json::json!({
                "kty": "RSA", "kid": "enc", "use": "enc",
                "n": PRIMARY_KEY.modulus, "e": "AQAB"
            }),
            rsa_jwk("sig", PRIMARY_KEY.modulus),
        ]))
        .unwrap();

        assert_eq!(set.kids().collect::<Vec<_>>(), vec!["sig"]);
    }

    #[test]
    fn test_empty_key_set_is_malformed() {
        let err = KeySet::from_jwks(jwks(vec![])).unwrap_err();
        assert!(matches!(err, KeySetError::MalformedKeySet(_)));
    }

    #[test]
    fn test_only_unusable_keys_is_malformed() {
        let err = KeySet::from_jwks(jwks(vec![serde_json::json!({"kty": "EC", "kid": "ec"})]))
            .unwrap_err();
        assert!(matches!(err, KeySetError::MalformedKeySet(_)));
    }

    #[test]
    fn test_rsa_key_without_kid_fails_whole_set() {
        let mut keyless = rsa_jwk("x", PRIMARY_KEY.modulus);
        keyless.as_object_mut().unwrap().remove("kid");

        let err = KeySet::from_jwks(jwks(vec![rsa_jwk("k1", PRIMARY_KEY.modulus), keyless]))
            .unwrap_err();
        assert!(matches!(err, KeySetError::MalformedKeySet(msg) if msg.contains("kid")));
    }

    #[test]
    fn test_rsa_key_without_modulus_fails_whole_set() {
        let mut broken = rsa_jwk("k2", PRIMARY_KEY.modulus);
        broken.as_object_mut().unwrap().remove("n");

        let err = KeySet::from_jwks(jwks(vec![rsa_jwk("k1", PRIMARY_KEY.modulus), broken]))
            .unwrap_err();
        assert!(matches!(err, KeySetError::MalformedKeySet(msg) if msg.contains("k2")));
    }

    #[test]
    fn test_rsa_key_with_invalid_base64_fails_whole_set() {
        let err =
            KeySet::from_jwks(jwks(vec![rsa_jwk("k1", "not base64url!!")])).unwrap_err();
        assert!(matches!(err, KeySetError::MalformedKeySet(_)));
    }

    #[test]
    fn test_signing_key_debug_omits_key_material() {
        let set = KeySet::from_jwks(jwks(vec![rsa_jwk("k1", PRIMARY_KEY.modulus)])).unwrap();
        let debug = format!("{:?}", set.lookup("k1").unwrap());

        assert!(debug.contains("k1"));
        assert!(!debug.contains(PRIMARY_KEY.modulus));
    }
}
