//! HTTP middleware.
//!
//! # Components
//!
//! - `auth` - Authentication middleware for protected routes
//! - `http_metrics` - HTTP request metrics middleware

pub mod auth;
pub mod http_metrics;

pub use auth::{extract_bearer, require_auth, AuthState, ClaimsExt};
pub use http_metrics::http_metrics_middleware;
