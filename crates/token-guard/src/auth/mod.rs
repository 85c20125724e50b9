//! Authentication and authorization components.
//!
//! - `jwks` - JWK document model and immutable key set snapshots
//! - `key_store` - JWKS cache with single-flight refresh
//! - `verifier` - Algorithm allow-listing and signature verification
//! - `claims` - Issuer, audience and time-window validation
//! - `identity` - The validated identity handed to callers
//! - `policy` - Per-operation role and audience authorization

pub mod claims;
pub mod identity;
pub mod jwks;
pub mod key_store;
pub mod policy;
pub mod verifier;
