//! Metrics definitions.
//!
//! All metrics follow Prometheus naming conventions:
//! - `idp_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `endpoint`: the routed paths, with user IDs replaced by `{id}`
//! - `outcome`: `valid` or a [`crate::auth::TokenError::kind`] label
//! - `audience`: `management`, `application` or `custom`
//! - `status`: a fixed set per operation

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus metrics recorder and return the handle for
/// serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("idp_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // Provider round-trips: JWKS fetch, token acquisition, management calls
        .set_buckets_for_metric(
            Matcher::Prefix("idp_jwks_fetch".to_string()),
            &[0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000],
        )
        .map_err(|e| format!("Failed to set JWKS fetch buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("idp_token_acquisition".to_string()),
            &[0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000],
        )
        .map_err(|e| format!("Failed to set token acquisition buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("idp_management_request".to_string()),
            &[0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000],
        )
        .map_err(|e| format!("Failed to set management request buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `idp_http_requests_total`, `idp_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("idp_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("idp_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Categorize HTTP status code into success/error/timeout
fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Normalize endpoint path to prevent label cardinality explosion
fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/v1/health" => "/v1/health",
        "/metrics" => "/metrics",
        "/v1/me" => "/v1/me",
        _ => match path.strip_prefix("/v1/users/") {
            Some(id) if !id.is_empty() && !id.contains('/') => "/v1/users/{id}",
            _ => "/other",
        },
    }
}

// ============================================================================
// Token Trust Metrics
// ============================================================================

/// Record the outcome of one token verification
///
/// Metric: `idp_token_validations_total`
/// Labels: `outcome`
pub fn record_token_validation(outcome: &'static str) {
    counter!("idp_token_validations_total", "outcome" => outcome).increment(1);
}

/// Record a key-set fetch
///
/// Metric: `idp_jwks_fetch_total`, `idp_jwks_fetch_duration_seconds`
/// Labels: `status` (success, network_failure, malformed)
pub fn record_jwks_fetch(status: &'static str, duration: Duration) {
    histogram!("idp_jwks_fetch_duration_seconds", "status" => status)
        .record(duration.as_secs_f64());
    counter!("idp_jwks_fetch_total", "status" => status).increment(1);
}

/// Record a key-set refresh suppressed by the minimum interval
///
/// Metric: `idp_jwks_refresh_skipped_total`
pub fn record_jwks_refresh_skipped() {
    counter!("idp_jwks_refresh_skipped_total").increment(1);
}

// ============================================================================
// Token Cache Metrics
// ============================================================================

/// Record a token cache lookup
///
/// Metric: `idp_token_cache_lookups_total`
/// Labels: `audience`, `result` (hit, miss)
pub fn record_token_cache_lookup(audience: &'static str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("idp_token_cache_lookups_total",
        "audience" => audience,
        "result" => result
    )
    .increment(1);
}

/// Record a client-credentials token acquisition
///
/// Metric: `idp_token_acquisition_total`, `idp_token_acquisition_duration_seconds`
/// Labels: `audience`, `status` (success, network, rejected, invalid_response,
/// verification)
pub fn record_token_acquisition(audience: &'static str, status: &'static str, duration: Duration) {
    histogram!("idp_token_acquisition_duration_seconds",
        "audience" => audience,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("idp_token_acquisition_total",
        "audience" => audience,
        "status" => status
    )
    .increment(1);
}

// ============================================================================
// Management API Metrics
// ============================================================================

/// Record a management API call
///
/// Metric: `idp_management_requests_total`, `idp_management_request_duration_seconds`
/// Labels: `operation` (signup, delete_user), `status` (success, error)
pub fn record_management_request(operation: &'static str, status: &'static str, duration: Duration) {
    histogram!("idp_management_request_duration_seconds",
        "operation" => operation,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("idp_management_requests_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
}
