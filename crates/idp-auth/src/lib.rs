//! Identity-provider authentication service library.
//!
//! Verifies bearer tokens issued by a remote OAuth identity provider and
//! acquires client-credentials tokens for calling the provider's own APIs.
//!
//! # Architecture
//!
//! ```text
//! auth/jwks.rs -> auth/validation.rs -> auth/jwt.rs -> middleware/auth.rs
//!                                            |
//!                                  services/token_cache.rs -> services/management.rs
//! ```
//!
//! # Modules
//!
//! - `auth` - Key resolution, claim validation and token verification
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - Authentication and HTTP metrics middleware
//! - `models` - Response models
//! - `observability` - Prometheus metrics
//! - `routes` - Axum router setup and application state
//! - `services` - Token cache and management client

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod routes;
pub mod services;
