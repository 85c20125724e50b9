//! Background tasks.
//!
//! # Tasks
//!
//! - `key_refresher` - Periodically refreshes the JWKS key store

pub mod key_refresher;

pub use key_refresher::{spawn_key_refresher, start_key_refresher};
