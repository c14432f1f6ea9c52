//! Common utilities shared by the identity-provider auth crates.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for compact JWT decoding utilities (size limits, segment decoding)
pub mod jwt;
