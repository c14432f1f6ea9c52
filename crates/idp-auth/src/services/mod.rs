//! Service layer: outbound calls to the identity provider.
//!
//! # Components
//!
//! - `provider` - Shared HTTP client and provider error-body parsing
//! - `token_cache` - Client-credentials token acquisition and caching
//! - `management` - User signup and deletion

pub mod management;
pub mod provider;
pub mod token_cache;

pub use management::{CreatedUser, IdpError, ManagementClient, SignupRequest};
pub use token_cache::{
    AcquisitionError, CachedCredential, TokenAudience, TokenCache, TokenCacheConfig,
};
