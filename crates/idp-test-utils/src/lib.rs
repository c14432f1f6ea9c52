//! # IdP Test Utilities
//!
//! Shared test utilities for the idp-auth service.
//!
//! This crate provides:
//! - Fixed RSA signing keys (`crypto_fixtures`)
//! - Fluent claim builders (`token_builders`)
//! - A wiremock identity provider (`mock_idp`)
//! - Server test harness (`TestAuthServer` for E2E tests)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use idp_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<()> {
//!     let idp = MockIdentityProvider::start().await;
//!     let server = TestAuthServer::spawn(&idp).await?;
//!
//!     let token = idp.sign(&TestTokenBuilder::new().build());
//!     let response = reqwest::Client::new()
//!         .get(format!("{}/v1/me", server.url()))
//!         .bearer_auth(token)
//!         .send()
//!         .await?;
//!
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod crypto_fixtures;
pub mod mock_idp;
pub mod server_harness;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use mock_idp::*;
pub use server_harness::*;
pub use token_builders::*;
