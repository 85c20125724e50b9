//! Token Guard: bearer-token validation and claims-based authorization.
//!
//! This library validates JWT access tokens issued by an external OpenID
//! Connect provider and turns them into authorization decisions:
//!
//! - Signing keys fetched from the provider's JWKS endpoint, cached as
//!   immutable snapshots, refreshed on schedule and on cache miss
//! - Signature verification restricted to an explicit algorithm allow-list
//! - Issuer, audience and time-window validation with clock skew tolerance
//! - Role-based policy evaluation per protected operation
//!
//! # Architecture
//!
//! The validation pipeline drives each stage in strict order and stops at
//! the first failure:
//!
//! ```text
//! RawToken -> common::jwt::parse -> auth::verifier -> auth::claims -> auth::policy
//!                                        |
//!                                  auth::key_store (JWKS cache, single-flight refresh)
//! ```
//!
//! # Modules
//!
//! - `auth` - Key store, verifier, claims validator, identity, policy
//! - `config` - Validator configuration from environment or builder
//! - `discovery` - OpenID Connect discovery of the JWKS URL
//! - `errors` - Error taxonomy and pipeline rejections
//! - `observability` - Metric definitions
//! - `pipeline` - The `TokenValidator` entry point
//! - `tasks` - Background key refresh

pub mod auth;
pub mod config;
pub mod discovery;
pub mod errors;
pub mod observability;
pub mod pipeline;
pub mod tasks;

pub use auth::identity::ValidatedIdentity;
pub use auth::key_store::{HttpJwksFetcher, JwksFetcher, KeyStore, KeyStoreOptions};
pub use auth::policy::{authorize, PolicyDescriptor, RoleMatch};
pub use common::jwt::RawToken;
pub use config::ValidatorConfig;
pub use errors::{ErrorKind, Rejection, Stage};
pub use pipeline::TokenValidator;
