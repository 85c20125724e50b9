//! Secret types for protecting bearer tokens from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. A bearer token is
//! a credential: anyone holding it can act as its subject until it expires.
//! Wrapping it in [`SecretString`] makes `Debug` output redacted and zeroizes
//! the buffer on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct Presented {
//!     scheme: &'static str,
//!     credential: SecretString,
//! }
//!
//! let presented = Presented {
//!     scheme: "Bearer",
//!     credential: SecretString::from("eyJhbGciOi...".to_string()),
//! };
//!
//! // Debug output never contains the credential
//! assert!(!format!("{presented:?}").contains("eyJhbGciOi"));
//!
//! // Access must be explicit
//! let token: &str = presented.credential.expose_secret();
//! assert!(token.starts_with("eyJ"));
//! ```

pub use secrecy::{ExposeSecret, SecretString};
