//! OpenID Connect discovery of the JWKS URL.
//!
//! Used when no JWKS URL is configured. The provider metadata is fetched from
//! `{issuer}/.well-known/openid-configuration` once, at construction time.
//!
//! # Security
//!
//! - The metadata `issuer` must equal the configured issuer exactly
//! - Both the discovery URL and the discovered `jwks_uri` must be HTTPS
//!   (plain HTTP only for loopback hosts)
//! - There is no fallback URL guessing: discovery either succeeds or the
//!   validator is not built

use crate::config::{is_secure_url, ConfigError};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

/// The subset of provider metadata used here.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer identifier; must match the expected issuer.
    pub issuer: String,

    /// Location of the provider's JWKS document.
    pub jwks_uri: String,

    /// Advertised signing algorithms (informational).
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("issuer URL '{0}' is not HTTPS")]
    InsecureIssuer(String),

    #[error("discovery request failed: {0}")]
    Http(String),

    #[error("discovery endpoint returned status {0}")]
    Status(u16),

    #[error("discovery document is malformed: {0}")]
    Malformed(String),

    #[error("discovery document issuer '{found}' does not match '{expected}'")]
    IssuerMismatch { expected: String, found: String },

    #[error("discovered jwks_uri '{0}' is not HTTPS")]
    InsecureJwksUri(String),
}

impl From<DiscoveryError> for ConfigError {
    fn from(e: DiscoveryError) -> Self {
        ConfigError::Discovery(e.to_string())
    }
}

/// Discovery document URL for `issuer`.
pub fn discovery_url(issuer: &str) -> String {
    format!("{}{}", issuer.trim_end_matches('/'), DISCOVERY_PATH)
}

/// Fetch and check the provider metadata for `issuer`.
///
/// # Errors
///
/// See [`DiscoveryError`].
#[instrument(skip(timeout), fields(issuer = %issuer))]
pub async fn discover(issuer: &str, timeout: Duration) -> Result<ProviderMetadata, DiscoveryError> {
    if !is_secure_url(issuer) {
        return Err(DiscoveryError::InsecureIssuer(issuer.to_string()));
    }

    let url = discovery_url(issuer);
    tracing::debug!(target: "guard.discovery", url = %url, "Fetching OpenID provider metadata");

    let http_client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(
                target: "guard.discovery",
                error = %e,
                "Failed to build HTTP client with custom config, using defaults"
            );
            reqwest::Client::new()
        });

    let response = http_client.get(&url).send().await.map_err(|e| {
        tracing::error!(target: "guard.discovery", error = %e, "Failed to fetch provider metadata");
        DiscoveryError::Http(e.to_string())
    })?;

    if !response.status().is_success() {
        tracing::error!(
            target: "guard.discovery",
            status = %response.status(),
            "Discovery endpoint returned error"
        );
        return Err(DiscoveryError::Status(response.status().as_u16()));
    }

    let metadata: ProviderMetadata = response.json().await.map_err(|e| {
        tracing::error!(target: "guard.discovery", error = %e, "Failed to parse provider metadata");
        DiscoveryError::Malformed(e.to_string())
    })?;

    check_metadata(issuer, &metadata)?;

    tracing::info!(
        target: "guard.discovery",
        jwks_uri = %metadata.jwks_uri,
        "Discovered JWKS URL"
    );

    Ok(metadata)
}

fn check_metadata(issuer: &str, metadata: &ProviderMetadata) -> Result<(), DiscoveryError> {
    if metadata.issuer != issuer {
        return Err(DiscoveryError::IssuerMismatch {
            expected: issuer.to_string(),
            found: metadata.issuer.clone(),
        });
    }
    if !is_secure_url(&metadata.jwks_uri) {
        return Err(DiscoveryError::InsecureJwksUri(metadata.jwks_uri.clone()));
    }
    Ok(())
}
