//! Prometheus metrics endpoint handler.
//!
//! # Security
//!
//! This endpoint is unauthenticated to allow Prometheus to scrape metrics.
//! No subjects, tokens or secrets are recorded in metrics, only operational
//! data with bounded cardinality labels.

use axum::{extract::State, response::IntoResponse};
use metrics_exporter_prometheus::PrometheusHandle;

/// Handler for GET /metrics
///
/// Returns Prometheus-formatted metrics for scraping.
///
/// ```text
/// # TYPE idp_token_validations_total counter
/// idp_token_validations_total{outcome="valid"} 42
/// idp_token_validations_total{outcome="expired"} 3
/// ```
#[tracing::instrument(skip_all, name = "idp.metrics.scrape")]
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}
