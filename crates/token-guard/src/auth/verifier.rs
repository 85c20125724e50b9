//! Signature verification.
//!
//! This is the only gate that turns a parsed token into a trusted one.
//!
//! # Security
//!
//! - The header algorithm is checked against the allow-list BEFORE any key
//!   lookup, so `none` and downgrade attempts never reach the key store
//! - Symmetric algorithms are never allow-listed: a public JWK must not be
//!   usable as an HMAC secret
//! - The key's family must match the header algorithm before verification
//! - The signature is checked over the exact received `header.payload` bytes
//! - Verification uses ring's asymmetric primitives; there is no
//!   byte-for-byte comparison of secret-derived values

use crate::auth::jwks::SigningKey;
use crate::auth::key_store::{KeyStore, KeyStoreError};
use crate::config::is_symmetric;
use crate::errors::ErrorKind;
use common::jwt::{ParsedToken, TokenClaims, TokenHeader};
use jsonwebtoken::Algorithm;
use std::str::FromStr;
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("the 'none' algorithm is not accepted")]
    NoneAlgorithm,

    #[error("unknown algorithm '{0}'")]
    UnknownAlgorithm(String),

    #[error("algorithm {0:?} is not allowed")]
    AlgorithmNotAllowed(Algorithm),

    #[error("token header has no kid")]
    MissingKeyId,

    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),

    #[error("signature does not verify under key '{0}'")]
    SignatureMismatch(String),
}

impl VerifyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VerifyError::NoneAlgorithm
            | VerifyError::UnknownAlgorithm(_)
            | VerifyError::AlgorithmNotAllowed(_) => ErrorKind::UnsupportedAlgorithm,
            VerifyError::MissingKeyId => ErrorKind::KeyNotFound,
            VerifyError::KeyStore(e) => e.kind(),
            VerifyError::SignatureMismatch(_) => ErrorKind::SignatureMismatch,
        }
    }
}

/// A token whose signature has been verified.
///
/// Only constructed by [`SignatureVerifier::verify`]. Claims still need
/// validation before they can be acted on.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    header: TokenHeader,
    claims: TokenClaims,
    algorithm: Algorithm,
    key_id: String,
}

impl VerifiedToken {
    pub(crate) fn new(
        header: TokenHeader,
        claims: TokenClaims,
        algorithm: Algorithm,
        key_id: String,
    ) -> Self {
        Self {
            header,
            claims,
            algorithm,
            key_id,
        }
    }

    pub fn header(&self) -> &TokenHeader {
        &self.header
    }

    pub fn claims(&self) -> &TokenClaims {
        &self.claims
    }

    /// Algorithm the signature was verified with.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Id of the key that verified the signature.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub(crate) fn into_key_and_claims(self) -> (String, TokenClaims) {
        (self.key_id, self.claims)
    }
}

/// Verifies token signatures against keys from the [`KeyStore`].
#[derive(Clone)]
pub struct SignatureVerifier {
    allowed_algorithms: Vec<Algorithm>,
    key_store: KeyStore,
}

impl SignatureVerifier {
    /// Create a verifier. Symmetric algorithms are dropped from the allow-list.
    pub fn new(
        allowed_algorithms: impl IntoIterator<Item = Algorithm>,
        key_store: KeyStore,
    ) -> Self {
        let allowed_algorithms = allowed_algorithms
            .into_iter()
            .filter(|alg| {
                if is_symmetric(*alg) {
                    tracing::warn!(
                        target: "guard.jwt",
                        algorithm = ?alg,
                        "Ignoring symmetric algorithm in allow-list"
                    );
                    return false;
                }
                true
            })
            .collect();

        Self {
            allowed_algorithms,
            key_store,
        }
    }

    pub fn allowed_algorithms(&self) -> &[Algorithm] {
        &self.allowed_algorithms
    }

    pub fn key_store(&self) -> &KeyStore {
        &self.key_store
    }

    /// Map the header's `alg` to an allow-listed algorithm.
    ///
    /// # Errors
    ///
    /// Fails for `none` (any case), unknown names, and algorithms that are
    /// not allow-listed.
    pub fn check_algorithm(&self, header: &TokenHeader) -> Result<Algorithm, VerifyError> {
        let name = header.algorithm.as_str();
        if name.eq_ignore_ascii_case("none") {
            return Err(VerifyError::NoneAlgorithm);
        }

        let algorithm =
            Algorithm::from_str(name).map_err(|_| VerifyError::UnknownAlgorithm(name.to_string()))?;

        if !self.allowed_algorithms.contains(&algorithm) {
            return Err(VerifyError::AlgorithmNotAllowed(algorithm));
        }

        Ok(algorithm)
    }

    /// Verify the token's signature.
    ///
    /// # Security Checks
    ///
    /// 1. Algorithm allow-list (before any key lookup)
    /// 2. Key resolution by `kid` and algorithm
    /// 3. Signature over the exact signing input
    ///
    /// # Errors
    ///
    /// See [`VerifyError`].
    #[instrument(skip_all)]
    pub async fn verify(&self, token: ParsedToken) -> Result<VerifiedToken, VerifyError> {
        let algorithm = self.check_algorithm(token.header()).inspect_err(|e| {
            tracing::debug!(target: "guard.jwt", error = %e, "Token algorithm rejected");
        })?;

        let kid = token.header().key_id.clone().ok_or_else(|| {
            tracing::debug!(target: "guard.jwt", "Token has no kid");
            VerifyError::MissingKeyId
        })?;

        let key = self.key_store.resolve(&kid, algorithm).await?;

        verify_signature(&token, &key, algorithm)?;

        tracing::debug!(
            target: "guard.jwt",
            kid = %kid,
            algorithm = ?algorithm,
            "Token signature verified"
        );

        let (header, claims) = token.into_parts();
        Ok(VerifiedToken::new(header, claims, algorithm, kid))
    }
}

/// Check `token`'s signature with `key`.
pub(crate) fn verify_signature(
    token: &ParsedToken,
    key: &SigningKey,
    algorithm: Algorithm,
) -> Result<(), VerifyError> {
    let mismatch = || VerifyError::SignatureMismatch(key.key_id().to_string());

    // jsonwebtoken cannot verify with a key from another family.
    if !key.matches(algorithm) {
        tracing::warn!(
            target: "guard.jwt",
            kid = %key.key_id(),
            algorithm = ?algorithm,
            "Key family does not match token algorithm"
        );
        return Err(mismatch());
    }

    match jsonwebtoken::crypto::verify(
        token.signature_b64(),
        token.signing_input(),
        key.decoding_key(),
        algorithm,
    ) {
        Ok(true) => Ok(()),
        Ok(false) => {
            tracing::debug!(target: "guard.jwt", kid = %key.key_id(), "Token signature mismatch");
            Err(mismatch())
        }
        Err(e) => {
            tracing::debug!(
                target: "guard.jwt",
                kid = %key.key_id(),
                error = %e,
                "Token signature verification failed"
            );
            Err(mismatch())
        }
    }
}
