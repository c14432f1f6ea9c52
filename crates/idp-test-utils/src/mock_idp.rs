//! Mock identity provider for integration tests
//!
//! Wraps a wiremock server that serves the endpoints the service talks to:
//!
//! - `GET /.well-known/jwks.json` - the current key set (replaceable for rotation tests)
//! - `POST /oauth/token` - client-credentials grant; mints a distinct RS256
//!   token per request whose `aud` is the requested audience
//! - `POST /dbconnections/signup` and `DELETE /api/v2/users/{id}` - mounted on demand

use crate::crypto_fixtures::{jwks_json, TestKey, PRIMARY_KEY};
use crate::token_builders::TestTokenBuilder;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Key ID of [`PRIMARY_KEY`] in the default key set.
pub const PRIMARY_KID: &str = "key-1";

/// Key ID used for [`crate::SECONDARY_KEY`] in rotation tests.
pub const SECONDARY_KID: &str = "key-2";

/// Client ID the test configuration authenticates with.
pub const TEST_CLIENT_ID: &str = "test-m2m-client";

/// Client secret the test configuration authenticates with.
pub const TEST_CLIENT_SECRET: &str = "test-m2m-secret";

/// JWKS path relative to the issuer.
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

/// Token endpoint path relative to the issuer.
pub const TOKEN_PATH: &str = "/oauth/token";

/// Lifetime of minted client-credentials tokens.
pub const DEFAULT_TOKEN_LIFETIME_SECONDS: i64 = 86_400;

/// How the token endpoint answers.
#[derive(Debug, Clone)]
pub enum TokenEndpointMode {
    /// Mint a valid token for the requested audience.
    Issue,

    /// Mint a token whose `iss` does not match the provider.
    WrongIssuer,

    /// Answer with an error status and body.
    Fail { status: u16, body: Value },

    /// Answer 200 with a body that is not a token response.
    Garbage,
}

struct JwksResponder {
    jwks: Arc<Mutex<Value>>,
}

impl Respond for JwksResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let jwks = self.jwks.lock().unwrap().clone();
        ResponseTemplate::new(200).set_body_json(jwks)
    }
}

struct TokenResponder {
    issuer: String,
    key: TestKey,
    kid: &'static str,
    mode: Arc<Mutex<TokenEndpointMode>>,
    lifetime_seconds: Arc<Mutex<i64>>,
    delay: Arc<Mutex<Duration>>,
    minted: Arc<AtomicU64>,
}

impl Respond for TokenResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let delay = *self.delay.lock().unwrap();
        let mode = self.mode.lock().unwrap().clone();

        let template = match mode {
            TokenEndpointMode::Fail { status, body } => {
                ResponseTemplate::new(status).set_body_json(body)
            }
            TokenEndpointMode::Garbage => {
                ResponseTemplate::new(200).set_body_json(json!({"unexpected": true}))
            }
            TokenEndpointMode::Issue | TokenEndpointMode::WrongIssuer => {
                let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
                let audience = body["audience"].as_str().unwrap_or_default().to_string();
                let client_id = body["client_id"].as_str().unwrap_or_default().to_string();

                let issuer = match mode {
                    TokenEndpointMode::WrongIssuer => "https://impostor.example.com/".to_string(),
                    _ => self.issuer.clone(),
                };

                let lifetime = *self.lifetime_seconds.lock().unwrap();
                let serial = self.minted.fetch_add(1, Ordering::SeqCst) + 1;
                let now = Utc::now().timestamp();

                let claims = json!({
                    "iss": issuer,
                    "sub": format!("{}@clients", client_id),
                    "aud": audience,
                    "iat": now,
                    "exp": now + lifetime,
                    "azp": client_id,
                    "gty": "client-credentials",
                    "jti": format!("token-{}", serial),
                });

                ResponseTemplate::new(200).set_body_json(json!({
                    "access_token": self.key.sign(self.kid, &claims),
                    "token_type": "Bearer",
                    "expires_in": lifetime,
                }))
            }
        };

        template.set_delay(delay)
    }
}

/// A running mock identity provider.
pub struct MockIdentityProvider {
    server: MockServer,
    jwks: Arc<Mutex<Value>>,
    token_mode: Arc<Mutex<TokenEndpointMode>>,
    token_lifetime: Arc<Mutex<i64>>,
    token_delay: Arc<Mutex<Duration>>,
    minted: Arc<AtomicU64>,
}

impl MockIdentityProvider {
    /// Start a provider publishing [`PRIMARY_KEY`] as [`PRIMARY_KID`].
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let issuer = format!("{}/", server.uri());

        let jwks = Arc::new(Mutex::new(jwks_json(&[(PRIMARY_KID, &PRIMARY_KEY)])));
        let token_mode = Arc::new(Mutex::new(TokenEndpointMode::Issue));
        let token_lifetime = Arc::new(Mutex::new(DEFAULT_TOKEN_LIFETIME_SECONDS));
        let token_delay = Arc::new(Mutex::new(Duration::ZERO));
        let minted = Arc::new(AtomicU64::new(0));

        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(JwksResponder {
                jwks: Arc::clone(&jwks),
            })
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(TokenResponder {
                issuer,
                key: PRIMARY_KEY,
                kid: PRIMARY_KID,
                mode: Arc::clone(&token_mode),
                lifetime_seconds: Arc::clone(&token_lifetime),
                delay: Arc::clone(&token_delay),
                minted: Arc::clone(&minted),
            })
            .mount(&server)
            .await;

        Self {
            server,
            jwks,
            token_mode,
            token_lifetime,
            token_delay,
            minted,
        }
    }

    /// Base URI without a trailing slash (the `AUTH0_ISS_DOMAIN` value).
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// The `iss` value of tokens this provider issues.
    pub fn issuer(&self) -> String {
        format!("{}/", self.server.uri())
    }

    /// The underlying wiremock server, for mounting extra mocks.
    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// A claims builder bound to this provider's issuer.
    pub fn token_builder(&self) -> TestTokenBuilder {
        TestTokenBuilder::new().issued_by(&self.issuer())
    }

    /// Sign `claims` with the primary key.
    pub fn sign(&self, claims: &Value) -> String {
        PRIMARY_KEY.sign(PRIMARY_KID, claims)
    }

    /// Replace the published key set.
    pub fn publish_keys(&self, keys: &[(&str, &TestKey)]) {
        *self.jwks.lock().unwrap() = jwks_json(keys);
    }

    /// Replace the published JWKS document verbatim.
    pub fn publish_jwks(&self, jwks: Value) {
        *self.jwks.lock().unwrap() = jwks;
    }

    /// Change how the token endpoint answers.
    pub fn set_token_mode(&self, mode: TokenEndpointMode) {
        *self.token_mode.lock().unwrap() = mode;
    }

    /// Make the token endpoint answer with `status` and `body`.
    pub fn fail_token_requests(&self, status: u16, body: Value) {
        self.set_token_mode(TokenEndpointMode::Fail { status, body });
    }

    /// Lifetime of tokens minted from now on.
    pub fn set_token_lifetime(&self, seconds: i64) {
        *self.token_lifetime.lock().unwrap() = seconds;
    }

    /// Delay every token endpoint response.
    pub fn set_token_delay(&self, delay: Duration) {
        *self.token_delay.lock().unwrap() = delay;
    }

    /// Number of tokens minted so far.
    pub fn tokens_minted(&self) -> u64 {
        self.minted.load(Ordering::SeqCst)
    }

    /// Number of requests received on `request_path`.
    pub async fn request_count(&self, request_path: &str) -> usize {
        self.requests_to(request_path).await.len()
    }

    /// Requests received on `request_path`, in arrival order.
    pub async fn requests_to(&self, request_path: &str) -> Vec<Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.url.path() == request_path)
            .collect()
    }

    /// Number of JWKS fetches received.
    pub async fn jwks_requests(&self) -> usize {
        self.request_count(JWKS_PATH).await
    }

    /// Number of token requests received.
    pub async fn token_requests(&self) -> usize {
        self.request_count(TOKEN_PATH).await
    }

    /// Answer signups with `status` and `body`.
    pub async fn mount_signup(&self, status: u16, body: Value) {
        Mock::given(method("POST"))
            .and(path("/dbconnections/signup"))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Answer user deletions with `status` (and `body` when given).
    pub async fn mount_delete_user(&self, status: u16, body: Option<Value>) {
        let template = match body {
            Some(body) => ResponseTemplate::new(status).set_body_json(body),
            None => ResponseTemplate::new(status),
        };

        Mock::given(method("DELETE"))
            .and(path_regex(r"^/api/v2/users/[^/]+$"))
            .respond_with(template)
            .mount(&self.server)
            .await;
    }
}
