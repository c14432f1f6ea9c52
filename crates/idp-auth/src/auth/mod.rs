//! Token trust core.
//!
//! Verifies access tokens issued by the identity provider using the keys
//! published at its JWKS endpoint.
//!
//! # Components
//!
//! - `jwks` - JWKS client holding the provider's signing keys
//! - `validation` - Claim checks (time bounds, issuer, audience)
//! - `jwt` - RS256 verification of compact tokens
//! - `claims` - Claims structure for verified tokens

pub mod claims;
pub mod jwks;
pub mod jwt;
pub mod validation;

pub use claims::{Audience, Claims};
pub use jwks::{JwksClient, KeySet, KeySetError, RefreshOutcome, SigningKey};
pub use jwt::{Token, TokenError, TokenVerifier};
pub use validation::ClaimsError;
