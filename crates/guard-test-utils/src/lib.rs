//! # Guard Test Utilities
//!
//! Shared test utilities for the token-guard crate.
//!
//! This crate provides:
//! - Signing key fixtures for RS256, ES256 and EdDSA, with matching JWKs
//! - Test claims builder (`TestClaimsBuilder`)
//! - Mock OpenID provider serving JWKS and discovery documents
//! - In-memory JWKS fetcher with call counting
//!
//! ## Usage
//!
//! ```rust,ignore
//! use guard_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let key = TestSigningKey::ed25519(1, "key-1");
//!     let provider = MockJwksProvider::start().await;
//!     provider.serve_keys(&[&key]).await;
//!
//!     let claims = TestClaimsBuilder::new(provider.issuer(), "api://test")
//!         .with_roles(&["reader"])
//!         .build();
//!     let token = key.sign(&claims);
//! }
//! ```

pub mod crypto_fixtures;
pub mod jwks_server;
pub mod static_fetcher;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use jwks_server::*;
pub use static_fetcher::*;
pub use token_builders::*;
