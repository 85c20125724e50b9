//! The identity produced by a successful validation.
//!
//! A [`ValidatedIdentity`] can only be built inside this crate, after the
//! signature and claims checks have passed. The `sub` value is redacted in
//! Debug output to prevent exposure in logs.

use chrono::{DateTime, Utc};
use common::jwt::TokenClaims;
use jsonwebtoken::Algorithm;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;

/// Caller identity extracted from a verified, validated token.
#[derive(Clone, PartialEq)]
pub struct ValidatedIdentity {
    subject: Option<String>,
    issuer: String,
    audiences: Vec<String>,
    audience_case_sensitive: bool,
    roles: BTreeSet<String>,
    expires_at: DateTime<Utc>,
    issued_at: Option<DateTime<Utc>>,
    key_id: String,
    algorithm: Algorithm,
    claims: Map<String, Value>,
}

impl ValidatedIdentity {
    pub(crate) fn new(
        claims: TokenClaims,
        roles: BTreeSet<String>,
        expires_at: DateTime<Utc>,
        key_id: String,
        algorithm: Algorithm,
    ) -> Self {
        let subject = claims.subject().map(ToString::to_string);
        let issuer = claims.issuer().unwrap_or_default().to_string();
        let audiences = claims
            .audiences()
            .unwrap_or_default()
            .into_iter()
            .map(ToString::to_string)
            .collect();
        let issued_at = claims
            .issued_at()
            .and_then(|iat| DateTime::from_timestamp(iat, 0));

        Self {
            subject,
            issuer,
            audiences,
            audience_case_sensitive: true,
            roles,
            expires_at,
            issued_at,
            key_id,
            algorithm,
            claims: claims.into_map(),
        }
    }

    /// Match audiences the way the claims check did.
    pub(crate) fn with_audience_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.audience_case_sensitive = case_sensitive;
        self
    }

    /// `sub` claim. Providers may omit it for client-credential tokens.
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// `iss` claim.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// `aud` claim, normalized to a list.
    pub fn audiences(&self) -> &[String] {
        &self.audiences
    }

    /// Whether `audience` is one of the token's audiences, compared with the
    /// same case rule the claims check applied.
    pub fn has_audience(&self, audience: &str) -> bool {
        self.audiences.iter().any(|a| {
            if self.audience_case_sensitive {
                a == audience
            } else {
                a.eq_ignore_ascii_case(audience)
            }
        })
    }

    /// Roles collected from the configured role claims.
    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// `exp` claim.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// `iat` claim, if present.
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.issued_at
    }

    /// Id of the key that signed the token.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Signature algorithm of the token.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Look up any claim, including provider-specific ones.
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// All claims as received.
    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }
}

impl fmt::Debug for ValidatedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedIdentity")
            .field("subject", &self.subject.as_ref().map(|_| "[REDACTED]"))
            .field("issuer", &self.issuer)
            .field("audiences", &self.audiences)
            .field("roles", &self.roles)
            .field("expires_at", &self.expires_at)
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}
