//! Identity-provider authentication service.
//!
//! Loads configuration, fetches the provider's signing keys (refusing to
//! start without them), and serves the HTTP API until SIGINT or SIGTERM.

use idp_auth::config::Config;
use idp_auth::observability::metrics::init_metrics_recorder;
use idp_auth::routes::{build_routes, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "idp_auth=info,idp=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().inspect_err(|e| error!("Invalid configuration: {}", e))?;
    let addr: SocketAddr = config
        .bind_address
        .parse()
        .inspect_err(|e| error!("Invalid bind address: {}", e))?;

    info!(
        issuer = %config.issuer_domain,
        audience = %config.api_identifier,
        "Starting idp-auth"
    );

    let metrics_handle = init_metrics_recorder()?;

    // Never serve without a complete key set
    let state = AppState::from_config(config)
        .await
        .inspect_err(|e| error!("Failed to load signing keys: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "idp-auth listening");

    axum::serve(listener, build_routes(Arc::new(state), metrics_handle))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("idp-auth stopped");
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix. In-flight requests finish before
/// `axum::serve` returns.
async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for SIGINT: {}", e);
            }
        }
        _ = terminate => {}
    }

    info!("Shutdown signal received");
}
