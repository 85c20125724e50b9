//! Common token-format utilities shared across the Token Guard crates.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for compact JWT parsing (header, claims, signature segments)
pub mod jwt;
