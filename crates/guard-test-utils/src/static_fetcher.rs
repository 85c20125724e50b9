//! In-memory JWKS fetcher
//!
//! Serves whatever document it currently holds and counts calls. Used where
//! HTTP is beside the point (benchmarks, concurrency tests).

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use token_guard::auth::jwks::JwksDocument;
use token_guard::auth::key_store::{FetchError, JwksFetcher};

use crate::crypto_fixtures::TestSigningKey;

#[derive(Default)]
pub struct StaticJwksFetcher {
    keys: Mutex<Vec<Value>>,
    calls: AtomicUsize,
}

impl StaticJwksFetcher {
    pub fn new(keys: &[&TestSigningKey]) -> Self {
        let fetcher = Self::default();
        fetcher.set_keys(keys);
        fetcher
    }

    /// Replace the published keys.
    pub fn set_keys(&self, keys: &[&TestSigningKey]) {
        *self.keys.lock().unwrap() = keys.iter().map(|key| key.jwk()).collect();
    }

    /// Number of fetches served.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JwksFetcher for StaticJwksFetcher {
    async fn fetch(&self) -> Result<JwksDocument, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(JwksDocument {
            keys: self.keys.lock().unwrap().clone(),
        })
    }
}
