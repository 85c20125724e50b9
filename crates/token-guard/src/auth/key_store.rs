//! JWKS key store with single-flight refresh.
//!
//! The key store is the only shared mutable state in the validation path. It
//! holds the provider's signing keys as an immutable [`KeySet`] snapshot
//! behind an [`ArcSwap`], so lookups never block each other.
//!
//! # Refresh
//!
//! A refresh fetches the full JWKS document and atomically swaps in a new
//! snapshot. Refreshes are triggered on cache miss, on a schedule (see
//! `tasks::key_refresher`) and on demand. All three share one single-flight
//! path:
//!
//! - At most one fetch is in flight per store; concurrent callers await the
//!   same shared future
//! - The fetch runs on its own task, so a caller that gives up does not
//!   cancel it for everyone else
//! - Every fetch is bounded by the configured timeout
//! - A failed fetch leaves the current snapshot in place
//! - After a miss refresh that still lacks the requested kid, further misses
//!   do not start a fetch for `min_refresh_interval`

use crate::auth::jwks::{JwksDocument, KeySet, SigningKey};
use crate::config::{ValidatorConfig, DEFAULT_FETCH_TIMEOUT, DEFAULT_MIN_REFRESH_INTERVAL};
use crate::errors::ErrorKind;
use crate::observability::metrics;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use jsonwebtoken::Algorithm;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::instrument;

/// Failure to obtain a usable key set from the provider.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("JWKS request failed: {0}")]
    Http(String),

    #[error("JWKS endpoint returned status {0}")]
    Status(u16),

    #[error("JWKS document is malformed: {0}")]
    Malformed(String),

    #[error("JWKS document contains no usable keys")]
    NoUsableKeys,

    #[error("JWKS fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("JWKS refresh task ended before completing")]
    Aborted,
}

impl FetchError {
    fn metric_status(&self) -> &'static str {
        match self {
            FetchError::Timeout(_) => "timeout",
            _ => "error",
        }
    }
}

/// Failure to resolve a signing key.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyStoreError {
    #[error("no signing key matches kid '{kid}' and algorithm {algorithm:?}")]
    KeyNotFound { kid: String, algorithm: Algorithm },

    #[error("key set refresh failed: {0}")]
    FetchFailed(#[from] FetchError),
}

impl KeyStoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KeyStoreError::KeyNotFound { .. } => ErrorKind::KeyNotFound,
            KeyStoreError::FetchFailed(_) => ErrorKind::FetchFailed,
        }
    }
}

/// Source of JWKS documents.
#[async_trait]
pub trait JwksFetcher: Send + Sync {
    /// Fetch the current document.
    async fn fetch(&self) -> Result<JwksDocument, FetchError>;
}

/// Fetches the JWKS document over HTTP.
pub struct HttpJwksFetcher {
    /// URL to the JWKS endpoint.
    jwks_url: String,

    /// HTTP client for fetching JWKS.
    http_client: reqwest::Client,
}

impl HttpJwksFetcher {
    /// Create a fetcher whose requests time out after `timeout`.
    pub fn new(jwks_url: impl Into<String>, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(
                    target: "guard.jwks",
                    error = %e,
                    "Failed to build HTTP client with custom config, using defaults"
                );
                reqwest::Client::new()
            });

        Self {
            jwks_url: jwks_url.into(),
            http_client,
        }
    }

    /// URL this fetcher reads from.
    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }
}

#[async_trait]
impl JwksFetcher for HttpJwksFetcher {
    async fn fetch(&self) -> Result<JwksDocument, FetchError> {
        tracing::debug!(target: "guard.jwks", url = %self.jwks_url, "Fetching JWKS");

        let response = self
            .http_client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| FetchError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        response
            .json::<JwksDocument>()
            .await
            .map_err(|e| FetchError::Malformed(e.to_string()))
    }
}

/// Key store tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyStoreOptions {
    /// Upper bound on one fetch, including body download.
    pub fetch_timeout: Duration,

    /// Cache-miss refresh cooldown. Zero disables it.
    pub min_refresh_interval: Duration,
}

impl Default for KeyStoreOptions {
    fn default() -> Self {
        Self {
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
        }
    }
}

impl From<&ValidatorConfig> for KeyStoreOptions {
    fn from(config: &ValidatorConfig) -> Self {
        Self {
            fetch_timeout: config.fetch_timeout,
            min_refresh_interval: config.min_refresh_interval,
        }
    }
}

/// What started a refresh. Used for logging and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    /// A lookup found no matching key.
    Miss,
    /// The background refresher's timer fired.
    Scheduled,
    /// An explicit [`KeyStore::refresh`] call.
    Manual,
}

impl RefreshTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            RefreshTrigger::Miss => "miss",
            RefreshTrigger::Scheduled => "scheduled",
            RefreshTrigger::Manual => "manual",
        }
    }
}

type RefreshFuture = Shared<BoxFuture<'static, Result<Arc<KeySet>, FetchError>>>;

struct InFlight {
    id: u64,
    future: RefreshFuture,
}

struct Inner {
    fetcher: Arc<dyn JwksFetcher>,
    options: KeyStoreOptions,
    current: ArcSwap<KeySet>,
    in_flight: Mutex<Option<InFlight>>,
    next_flight_id: AtomicU64,
    /// When a miss refresh last completed without the requested kid.
    unresolved_miss_at: Mutex<Option<Instant>>,
}

/// Process-wide cache of the provider's signing keys.
///
/// Cheap to clone; clones share the same cache and single-flight guard.
#[derive(Clone)]
pub struct KeyStore {
    inner: Arc<Inner>,
}

impl KeyStore {
    /// Create an empty key store backed by `fetcher`.
    pub fn new(fetcher: Arc<dyn JwksFetcher>, options: KeyStoreOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                options,
                current: ArcSwap::from_pointee(KeySet::empty()),
                in_flight: Mutex::new(None),
                next_flight_id: AtomicU64::new(1),
                unresolved_miss_at: Mutex::new(None),
            }),
        }
    }

    /// Create an empty key store that fetches from `jwks_url` over HTTP.
    pub fn from_url(jwks_url: impl Into<String>, options: KeyStoreOptions) -> Self {
        let fetcher = HttpJwksFetcher::new(jwks_url, options.fetch_timeout);
        Self::new(Arc::new(fetcher), options)
    }

    /// Store tuning.
    pub fn options(&self) -> KeyStoreOptions {
        self.inner.options
    }

    /// Current key set.
    pub fn snapshot(&self) -> Arc<KeySet> {
        self.inner.current.load_full()
    }

    /// Resolve the key for `kid` that may verify `algorithm`.
    ///
    /// A hit never touches the network. A miss refreshes the key set (joining
    /// any refresh already in flight) and looks again.
    ///
    /// # Errors
    ///
    /// - `KeyNotFound` if no matching key exists after the refresh, or if the
    ///   refresh was skipped by the cooldown
    /// - `FetchFailed` if the refresh failed
    #[instrument(skip(self), fields(kid = %kid))]
    pub async fn resolve(
        &self,
        kid: &str,
        algorithm: Algorithm,
    ) -> Result<SigningKey, KeyStoreError> {
        if let Some(key) = self.inner.current.load().find(kid, algorithm) {
            metrics::record_jwks_cache_lookup(true);
            tracing::debug!(target: "guard.jwks", kid = %kid, "JWKS cache hit");
            return Ok(key.clone());
        }
        metrics::record_jwks_cache_lookup(false);

        let Some(refresh) = self.join_or_start(RefreshTrigger::Miss, true) else {
            // A refresh may have landed since the first lookup.
            if let Some(key) = self.inner.current.load().find(kid, algorithm) {
                return Ok(key.clone());
            }
            tracing::warn!(
                target: "guard.jwks",
                kid = %kid,
                "Key not found and key set refreshed recently, skipping refresh"
            );
            return Err(KeyStoreError::KeyNotFound {
                kid: kid.to_string(),
                algorithm,
            });
        };

        let refreshed = refresh.await?;

        match refreshed.find(kid, algorithm) {
            Some(key) => Ok(key.clone()),
            None => {
                self.start_miss_cooldown();
                tracing::warn!(
                    target: "guard.jwks",
                    kid = %kid,
                    "Key not found in JWKS after refresh"
                );
                Err(KeyStoreError::KeyNotFound {
                    kid: kid.to_string(),
                    algorithm,
                })
            }
        }
    }

    /// Force a refresh, joining one already in flight. Ignores the cooldown.
    ///
    /// # Errors
    ///
    /// Returns the fetch failure; the previous key set stays in place.
    pub async fn refresh(&self) -> Result<Arc<KeySet>, FetchError> {
        self.refresh_for(RefreshTrigger::Manual).await
    }

    pub(crate) async fn refresh_for(
        &self,
        trigger: RefreshTrigger,
    ) -> Result<Arc<KeySet>, FetchError> {
        match self.join_or_start(trigger, false) {
            Some(refresh) => refresh.await,
            None => Ok(self.snapshot()),
        }
    }

    /// Get the in-flight refresh or start one.
    ///
    /// Returns `None` only when `respect_cooldown` is set, nothing is in
    /// flight, and a miss refresh recently failed to find its kid.
    fn join_or_start(
        &self,
        trigger: RefreshTrigger,
        respect_cooldown: bool,
    ) -> Option<RefreshFuture> {
        let mut slot = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // A completed future may linger until its task clears the slot.
        if let Some(flight) = slot.as_ref() {
            if flight.future.peek().is_none() {
                tracing::debug!(
                    target: "guard.jwks",
                    trigger = trigger.as_str(),
                    "Joining in-flight JWKS refresh"
                );
                return Some(flight.future.clone());
            }
        }

        if respect_cooldown && self.in_cooldown() {
            return None;
        }

        let id = self.inner.next_flight_id.fetch_add(1, Ordering::Relaxed);
        let store = self.clone();
        let task = tokio::spawn(async move {
            let result = store.fetch_and_swap(trigger).await;
            store.finish_flight(id);
            result
        });

        let future = async move {
            task.await.unwrap_or_else(|e| {
                tracing::error!(target: "guard.jwks", error = %e, "JWKS refresh task failed");
                Err(FetchError::Aborted)
            })
        }
        .boxed()
        .shared();

        *slot = Some(InFlight {
            id,
            future: future.clone(),
        });

        Some(future)
    }

    fn finish_flight(&self, id: u64) {
        let mut slot = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|flight| flight.id == id) {
            *slot = None;
        }
    }

    fn start_miss_cooldown(&self) {
        if self.inner.options.min_refresh_interval.is_zero() {
            return;
        }
        *self
            .inner
            .unresolved_miss_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    fn in_cooldown(&self) -> bool {
        let interval = self.inner.options.min_refresh_interval;
        if interval.is_zero() {
            return false;
        }
        self.inner
            .unresolved_miss_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some_and(|at| at.elapsed() < interval)
    }

    async fn fetch_and_swap(&self, trigger: RefreshTrigger) -> Result<Arc<KeySet>, FetchError> {
        let timeout = self.inner.options.fetch_timeout;
        let started = Instant::now();

        let result = match tokio::time::timeout(timeout, self.inner.fetcher.fetch()).await {
            Ok(fetched) => fetched,
            Err(_) => Err(FetchError::Timeout(timeout)),
        }
        .and_then(|document| {
            let version = self.inner.current.load().version() + 1;
            let set = KeySet::from_document(&document, version, Utc::now());
            if set.is_empty() {
                Err(FetchError::NoUsableKeys)
            } else {
                Ok(Arc::new(set))
            }
        });

        match result {
            Ok(set) => {
                self.inner.current.store(Arc::clone(&set));
                metrics::record_jwks_refresh("success", trigger.as_str(), started.elapsed());
                metrics::set_jwks_keys(set.len());
                tracing::info!(
                    target: "guard.jwks",
                    trigger = trigger.as_str(),
                    version = set.version(),
                    key_count = set.len(),
                    "JWKS cache refreshed"
                );
                Ok(set)
            }
            Err(e) => {
                metrics::record_jwks_refresh(
                    e.metric_status(),
                    trigger.as_str(),
                    started.elapsed(),
                );
                tracing::error!(
                    target: "guard.jwks",
                    trigger = trigger.as_str(),
                    error = %e,
                    "JWKS refresh failed, keeping previous key set"
                );
                Err(e)
            }
        }
    }
}
