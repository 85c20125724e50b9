//! The validation pipeline.
//!
//! [`TokenValidator`] drives a token through each stage in strict order:
//!
//! ```text
//! Received -> Parsed -> SignatureVerified -> ClaimsValidated -> Authorized
//!     \           \              \                  \
//!      +-----------+--------------+------------------+--> Rejected(stage, kind)
//! ```
//!
//! No stage is skipped or retried. The first failure yields a [`Rejection`]
//! carrying the stage and error kind; partially validated claims are dropped
//! with it. The only retry anywhere in the path is the key store's own
//! single-flight refresh on a cache miss.
//!
//! Validation is safe to run concurrently: the key store is the only shared
//! mutable state, and policies are passed per call.

use crate::auth::claims::ClaimsValidator;
use crate::auth::identity::ValidatedIdentity;
use crate::auth::key_store::{KeyStore, KeyStoreOptions};
use crate::auth::policy::{authorize, PolicyDescriptor};
use crate::auth::verifier::SignatureVerifier;
use crate::config::{ConfigError, ValidatorConfig};
use crate::discovery;
use crate::errors::{ErrorKind, Rejection, Stage};
use crate::observability::metrics;
use crate::tasks::spawn_key_refresher;
use common::jwt::{self, RawToken};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Progress of one token through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Received,
    Parsed,
    SignatureVerified,
    ClaimsValidated,
    Authorized,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineState::Received => "received",
            PipelineState::Parsed => "parsed",
            PipelineState::SignatureVerified => "signature_verified",
            PipelineState::ClaimsValidated => "claims_validated",
            PipelineState::Authorized => "authorized",
        })
    }
}

/// Validates bearer tokens and authorizes them against per-operation policies.
///
/// Cheap to clone; clones share the key store.
#[derive(Clone)]
pub struct TokenValidator {
    verifier: SignatureVerifier,
    claims: ClaimsValidator,
    key_refresh_interval: Duration,
}

impl TokenValidator {
    /// Build a validator around an existing key store.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration is invalid.
    pub fn new(config: &ValidatorConfig, key_store: KeyStore) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            verifier: SignatureVerifier::new(config.allowed_algorithms.iter().copied(), key_store),
            claims: ClaimsValidator::from_config(config),
            key_refresh_interval: config.key_refresh_interval,
        })
    }

    /// Build a validator that fetches keys over HTTP.
    ///
    /// Without a configured JWKS URL, the URL is discovered from the issuer's
    /// OpenID provider metadata first. The key store starts empty; call
    /// [`start_background_refresh`](Self::start_background_refresh) to warm it.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration is invalid or discovery
    /// fails.
    pub async fn from_config(config: &ValidatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let jwks_url = match &config.jwks_url {
            Some(url) => url.clone(),
            None => {
                discovery::discover(&config.expected_issuer, config.fetch_timeout)
                    .await?
                    .jwks_uri
            }
        };

        let key_store = KeyStore::from_url(jwks_url, KeyStoreOptions::from(config));
        Self::new(config, key_store)
    }

    /// The shared key store.
    pub fn key_store(&self) -> &KeyStore {
        self.verifier.key_store()
    }

    /// Spawn the scheduled key refresh at the configured interval.
    pub fn start_background_refresh(&self, cancel_token: CancellationToken) -> JoinHandle<()> {
        spawn_key_refresher(
            self.key_store().clone(),
            self.key_refresh_interval,
            cancel_token,
        )
    }

    /// Authenticate a token: parse, verify and validate claims.
    ///
    /// # Errors
    ///
    /// Returns a [`Rejection`] from the first failing stage.
    #[instrument(skip_all)]
    pub async fn authenticate(&self, token: &RawToken) -> Result<ValidatedIdentity, Rejection> {
        self.run(token, None).await
    }

    /// Authenticate a token and authorize it against `policy`.
    ///
    /// # Errors
    ///
    /// Returns a [`Rejection`] from the first failing stage. Authorization
    /// failures map to 403, everything else to 401.
    #[instrument(skip_all)]
    pub async fn validate(
        &self,
        token: &RawToken,
        policy: &PolicyDescriptor,
    ) -> Result<ValidatedIdentity, Rejection> {
        self.run(token, Some(policy)).await
    }

    async fn run(
        &self,
        token: &RawToken,
        policy: Option<&PolicyDescriptor>,
    ) -> Result<ValidatedIdentity, Rejection> {
        let started = Instant::now();
        let result = self.run_stages(token, policy).await;

        match &result {
            Ok(_) => metrics::record_token_validation(None, started.elapsed()),
            Err(rejection) => {
                tracing::debug!(
                    target: "guard.pipeline",
                    stage = %rejection.stage(),
                    kind = %rejection.kind(),
                    reason = %rejection.message(),
                    "Token rejected"
                );
                metrics::record_token_validation(Some(rejection), started.elapsed());
            }
        }

        result
    }

    async fn run_stages(
        &self,
        token: &RawToken,
        policy: Option<&PolicyDescriptor>,
    ) -> Result<ValidatedIdentity, Rejection> {
        trace_state(PipelineState::Received);

        let parsed = jwt::parse(token)
            .map_err(|e| Rejection::new(Stage::Parsing, ErrorKind::MalformedToken, e.to_string()))?;
        trace_state(PipelineState::Parsed);

        let verified = self
            .verifier
            .verify(parsed)
            .await
            .map_err(|e| Rejection::new(Stage::SignatureVerification, e.kind(), e.to_string()))?;
        trace_state(PipelineState::SignatureVerified);

        let identity = self
            .claims
            .validate(verified)
            .map_err(|e| Rejection::new(Stage::ClaimsValidation, e.kind(), e.to_string()))?;
        trace_state(PipelineState::ClaimsValidated);

        if let Some(policy) = policy {
            authorize(&identity, policy)
                .map_err(|e| Rejection::new(Stage::Authorization, e.kind(), e.to_string()))?;
            trace_state(PipelineState::Authorized);
        }

        Ok(identity)
    }
}

fn trace_state(state: PipelineState) {
    tracing::trace!(target: "guard.pipeline", state = %state, "Pipeline state");
}
