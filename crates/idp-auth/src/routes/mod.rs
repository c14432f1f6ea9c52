//! HTTP routes.
//!
//! Defines the Axum router and application state.

use crate::auth::{JwksClient, KeySetError, TokenVerifier};
use crate::config::Config;
use crate::handlers;
use crate::middleware::{http_metrics_middleware, require_auth, AuthState};
use crate::services::provider::build_http_client;
use crate::services::{ManagementClient, TokenCache, TokenCacheConfig};
use axum::{
    middleware,
    routing::{delete, get},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Inbound token verifier.
    pub verifier: Arc<TokenVerifier>,

    /// Outbound token cache.
    pub token_cache: Arc<TokenCache>,

    /// Provider user-management client.
    pub management: Arc<ManagementClient>,
}

impl AppState {
    /// Wire every component from configuration.
    ///
    /// Fetches the provider's key set first; nothing is built unless it
    /// loads completely.
    ///
    /// # Errors
    ///
    /// Any [`KeySetError`] from the initial key-set fetch.
    pub async fn from_config(config: Config) -> Result<Self, KeySetError> {
        let http_client = build_http_client(config.http_timeout());

        let jwks = JwksClient::fetch(
            config.jwks_url(),
            http_client.clone(),
            config.jwks_min_refresh_interval(),
        )
        .await?;

        let verifier = Arc::new(TokenVerifier::new(
            Arc::new(jwks),
            config.expected_issuer().to_string(),
            config.clock_skew(),
        ));

        let token_cache = Arc::new(TokenCache::new(
            TokenCacheConfig::from_config(&config),
            Arc::clone(&verifier),
            http_client.clone(),
        ));

        let management = Arc::new(ManagementClient::new(
            &config,
            Arc::clone(&token_cache),
            http_client,
        ));

        Ok(Self {
            config,
            verifier,
            token_cache,
            management,
        })
    }
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/v1/health` - Health check (public)
/// - `/metrics` - Prometheus metrics (public)
/// - `/v1/me` - Claims of the caller's token (authenticated)
/// - `/v1/users/:id` - Delete a user (authenticated, `delete:users`)
/// - TraceLayer for request logging
/// - 30 second request timeout
/// - HTTP metrics for every response
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let auth_state = Arc::new(AuthState {
        verifier: Arc::clone(&state.verifier),
        audience: state.config.api_identifier.clone(),
    });

    // Protected routes (require authentication)
    let protected_routes = Router::new()
        .route("/v1/me", get(handlers::get_me))
        .route("/v1/users/:id", delete(handlers::delete_user))
        .layer(middleware::from_fn_with_state(auth_state, require_auth))
        .with_state(Arc::clone(&state));

    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/v1/health", get(handlers::health_check))
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Layer order (outermost last):
    // 1. TimeoutLayer - bound request time
    // 2. TraceLayer - log request details
    // 3. http_metrics_middleware - record every response
    public_routes
        .merge(protected_routes)
        .merge(metrics_routes)
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(http_metrics_middleware))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[test]
    fn test_config_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<Config>();
    }
}
