//! Builder patterns for test data construction
//!
//! Provides a fluent API for creating JWT claims sets.

use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};

/// Builder for creating test JWT claims
///
/// Defaults to a token valid for one hour from now with no roles.
///
/// # Example
/// ```rust,ignore
/// let claims = TestClaimsBuilder::new("https://issuer.example", "api://test")
///     .for_subject("alice")
///     .with_roles(&["reader"])
///     .expires_in(300)
///     .build();
/// ```
pub struct TestClaimsBuilder {
    claims: Map<String, Value>,
}

impl TestClaimsBuilder {
    /// Create a new claims builder with defaults
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        let now = Utc::now();
        let mut claims = Map::new();
        claims.insert("iss".to_string(), json!(issuer.into()));
        claims.insert("sub".to_string(), json!("test-subject"));
        claims.insert("aud".to_string(), json!(audience.into()));
        claims.insert("iat".to_string(), json!(now.timestamp()));
        claims.insert(
            "exp".to_string(),
            json!((now + Duration::seconds(3600)).timestamp()),
        );
        Self { claims }
    }

    /// Set the subject
    pub fn for_subject(self, subject: &str) -> Self {
        self.with_claim("sub", json!(subject))
    }

    /// Set the audience to several values
    pub fn with_audiences(self, audiences: &[&str]) -> Self {
        self.with_claim("aud", json!(audiences))
    }

    /// Set the top-level `roles` claim
    pub fn with_roles(self, roles: &[&str]) -> Self {
        self.with_claim("roles", json!(roles))
    }

    /// Set expiration in seconds from now (negative for the past)
    pub fn expires_in(self, seconds: i64) -> Self {
        self.expires_at((Utc::now() + Duration::seconds(seconds)).timestamp())
    }

    /// Set the expiration timestamp
    pub fn expires_at(self, timestamp: i64) -> Self {
        self.with_claim("exp", json!(timestamp))
    }

    /// Set the not-before timestamp
    pub fn not_before(self, timestamp: i64) -> Self {
        self.with_claim("nbf", json!(timestamp))
    }

    /// Set the issued-at timestamp
    pub fn issued_at(self, timestamp: i64) -> Self {
        self.with_claim("iat", json!(timestamp))
    }

    /// Set an arbitrary claim
    pub fn with_claim(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    /// Remove a claim
    pub fn without(mut self, name: &str) -> Self {
        self.claims.remove(name);
        self
    }

    /// Build the claims as a JSON value
    pub fn build(self) -> Value {
        Value::Object(self.claims)
    }
}
