//! Test server harness for E2E testing
//!
//! Provides `TestAuthServer` for spawning real idp-auth server instances
//! wired to a [`MockIdentityProvider`].

use crate::mock_idp::{MockIdentityProvider, TEST_CLIENT_ID, TEST_CLIENT_SECRET};
use crate::token_builders::TEST_API_AUDIENCE;
use idp_auth::config::Config;
use idp_auth::routes::{self, AppState};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Test harness for spawning the idp-auth server in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health_flow_e2e() -> Result<()> {
///     let idp = MockIdentityProvider::start().await;
///     let server = TestAuthServer::spawn(&idp).await?;
///
///     let response = reqwest::get(format!("{}/v1/health", server.url())).await?;
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestAuthServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    _handle: JoinHandle<()>,
}

impl TestAuthServer {
    /// Spawn a server trusting `idp`.
    ///
    /// The server will:
    /// - Fetch the provider's key set (failing if it cannot)
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP server in the background
    pub async fn spawn(idp: &MockIdentityProvider) -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(idp, HashMap::new()).await
    }

    /// Spawn a server with extra or overriding environment values.
    pub async fn spawn_with_vars(
        idp: &MockIdentityProvider,
        overrides: HashMap<String, String>,
    ) -> Result<Self, anyhow::Error> {
        let mut vars = test_vars(idp);
        vars.extend(overrides);

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let state = Arc::new(
            AppState::from_config(config)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to load signing keys: {}", e))?,
        );

        // Initialize metrics recorder for test server
        let metrics_handle = match idp_auth::observability::metrics::init_metrics_recorder() {
            Ok(handle) => handle,
            Err(_) => {
                // If metrics recorder already installed globally, create a standalone recorder
                // without installing it.
                use metrics_exporter_prometheus::PrometheusBuilder;
                let recorder = PrometheusBuilder::new().build_recorder();
                recorder.handle()
            }
        };

        let app = routes::build_routes(Arc::clone(&state), metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            state,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the shared application state.
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }
}

impl Drop for TestAuthServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}

/// Environment values pointing the service at `idp`.
pub fn test_vars(idp: &MockIdentityProvider) -> HashMap<String, String> {
    HashMap::from([
        ("AUTH0_ISS_DOMAIN".to_string(), idp.uri()),
        (
            "AUTH0_AUD_API_IDENTIFIER".to_string(),
            TEST_API_AUDIENCE.to_string(),
        ),
        ("AUTH0_CLIENT_ID".to_string(), TEST_CLIENT_ID.to_string()),
        (
            "AUTH0_CLIENT_SECRET".to_string(),
            TEST_CLIENT_SECRET.to_string(),
        ),
        ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ("IDP_HTTP_TIMEOUT_SECONDS".to_string(), "2".to_string()),
    ])
}
