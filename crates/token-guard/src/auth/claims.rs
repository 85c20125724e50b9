//! Claims validation.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. `iss` equals the expected issuer exactly
//! 2. `aud` contains the expected audience
//! 3. `exp` has not passed
//! 4. `nbf` (if present) has been reached
//! 5. `iat` (if present) is not in the future
//!
//! All time checks apply the configured clock skew tolerance in the
//! permissive direction. Issuer, audience and expiration are required; a
//! claim of the wrong JSON type is treated as missing, never defaulted.

use crate::auth::identity::ValidatedIdentity;
use crate::auth::verifier::VerifiedToken;
use crate::config::ValidatorConfig;
use crate::errors::ErrorKind;
use chrono::{DateTime, Utc};
use common::jwt::TokenClaims;
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClaimsError {
    #[error("required claim '{0}' is missing")]
    MissingClaim(&'static str),

    #[error("claim '{0}' has an invalid value")]
    InvalidClaim(&'static str),

    #[error("issuer '{found}' does not match the expected issuer")]
    IssuerMismatch { found: String },

    #[error("expected audience is not among the token audiences")]
    AudienceMismatch,

    #[error("token carries {0} audiences, only one is accepted")]
    MultipleAudiences(usize),

    #[error("token expired at {exp} (now {now})")]
    Expired { exp: i64, now: i64 },

    #[error("token not valid before {nbf} (now {now})")]
    NotYetValid { nbf: i64, now: i64 },

    #[error("token issued in the future at {iat} (now {now})")]
    IssuedInFuture { iat: i64, now: i64 },
}

impl ClaimsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClaimsError::MissingClaim(_) | ClaimsError::InvalidClaim(_) => {
                ErrorKind::MissingRequiredClaim
            }
            ClaimsError::IssuerMismatch { .. } => ErrorKind::IssuerMismatch,
            ClaimsError::AudienceMismatch | ClaimsError::MultipleAudiences(_) => {
                ErrorKind::AudienceMismatch
            }
            ClaimsError::Expired { .. } => ErrorKind::Expired,
            ClaimsError::NotYetValid { .. } | ClaimsError::IssuedInFuture { .. } => {
                ErrorKind::NotYetValid
            }
        }
    }
}

/// Validates the claims of a verified token.
#[derive(Debug, Clone)]
pub struct ClaimsValidator {
    expected_issuer: String,
    expected_audience: String,
    clock_skew_seconds: i64,
    audience_case_sensitive: bool,
    allow_multiple_audiences: bool,
    role_claims: Vec<String>,
}

impl ClaimsValidator {
    /// Validator with case-sensitive audience matching, multiple audiences
    /// allowed, and roles read from `roles`.
    pub fn new(
        expected_issuer: impl Into<String>,
        expected_audience: impl Into<String>,
        clock_skew: Duration,
    ) -> Self {
        Self {
            expected_issuer: expected_issuer.into(),
            expected_audience: expected_audience.into(),
            clock_skew_seconds: i64::try_from(clock_skew.as_secs()).unwrap_or(i64::MAX),
            audience_case_sensitive: true,
            allow_multiple_audiences: true,
            role_claims: vec![crate::config::DEFAULT_ROLE_CLAIM.to_string()],
        }
    }

    pub fn from_config(config: &ValidatorConfig) -> Self {
        Self::new(
            config.expected_issuer.clone(),
            config.expected_audience.clone(),
            config.clock_skew,
        )
        .with_audience_matching(
            config.audience_case_sensitive,
            config.allow_multiple_audiences,
        )
        .with_role_claims(config.role_claims.iter().cloned())
    }

    #[must_use]
    pub fn with_audience_matching(mut self, case_sensitive: bool, allow_multiple: bool) -> Self {
        self.audience_case_sensitive = case_sensitive;
        self.allow_multiple_audiences = allow_multiple;
        self
    }

    #[must_use]
    pub fn with_role_claims(mut self, role_claims: impl IntoIterator<Item = String>) -> Self {
        self.role_claims = role_claims.into_iter().collect();
        self
    }

    /// Check claims against the current time.
    pub fn check(&self, claims: &TokenClaims) -> Result<(), ClaimsError> {
        self.check_at(claims, Utc::now().timestamp())
    }

    /// Check claims against `now` (Unix epoch seconds).
    ///
    /// Separate from [`check`](Self::check) so boundaries can be tested
    /// without depending on the wall clock.
    pub fn check_at(&self, claims: &TokenClaims, now: i64) -> Result<(), ClaimsError> {
        self.check_issuer(claims)?;
        self.check_audience(claims)?;
        self.check_time_window(claims, now)
    }

    /// Validate a verified token's claims and build the identity.
    pub fn validate(&self, verified: VerifiedToken) -> Result<ValidatedIdentity, ClaimsError> {
        self.validate_at(verified, Utc::now().timestamp())
    }

    /// [`validate`](Self::validate) against `now` (Unix epoch seconds).
    pub fn validate_at(
        &self,
        verified: VerifiedToken,
        now: i64,
    ) -> Result<ValidatedIdentity, ClaimsError> {
        self.check_at(verified.claims(), now).inspect_err(|e| {
            tracing::debug!(target: "guard.claims", error = %e, "Token claims rejected");
        })?;

        let expires_at = verified
            .claims()
            .expiration()
            .and_then(|exp| DateTime::<Utc>::from_timestamp(exp, 0))
            .ok_or(ClaimsError::InvalidClaim("exp"))?;

        let roles = self.extract_roles(verified.claims());
        let algorithm = verified.algorithm();
        let (key_id, claims) = verified.into_key_and_claims();

        tracing::debug!(target: "guard.claims", role_count = roles.len(), "Token claims validated");

        Ok(
            ValidatedIdentity::new(claims, roles, expires_at, key_id, algorithm)
                .with_audience_case_sensitive(self.audience_case_sensitive),
        )
    }

    /// Union of the string sets found at every configured role claim path.
    pub fn extract_roles(&self, claims: &TokenClaims) -> BTreeSet<String> {
        self.role_claims
            .iter()
            .flat_map(|path| claims.string_set(path))
            .collect()
    }

    fn check_issuer(&self, claims: &TokenClaims) -> Result<(), ClaimsError> {
        if claims.get("iss").is_none() {
            return Err(ClaimsError::MissingClaim("iss"));
        }
        let issuer = claims.issuer().ok_or(ClaimsError::InvalidClaim("iss"))?;
        if issuer != self.expected_issuer {
            return Err(ClaimsError::IssuerMismatch {
                found: issuer.to_string(),
            });
        }
        Ok(())
    }

    fn check_audience(&self, claims: &TokenClaims) -> Result<(), ClaimsError> {
        if claims.get("aud").is_none() {
            return Err(ClaimsError::MissingClaim("aud"));
        }
        let audiences = claims.audiences().ok_or(ClaimsError::InvalidClaim("aud"))?;

        if !self.allow_multiple_audiences && audiences.len() > 1 {
            return Err(ClaimsError::MultipleAudiences(audiences.len()));
        }

        let expected = self.expected_audience.as_str();
        let matched = audiences.iter().any(|aud| {
            if self.audience_case_sensitive {
                *aud == expected
            } else {
                aud.eq_ignore_ascii_case(expected)
            }
        });

        if matched {
            Ok(())
        } else {
            Err(ClaimsError::AudienceMismatch)
        }
    }

    fn check_time_window(&self, claims: &TokenClaims, now: i64) -> Result<(), ClaimsError> {
        let skew = self.clock_skew_seconds;

        if claims.get("exp").is_none() {
            return Err(ClaimsError::MissingClaim("exp"));
        }
        let exp = claims.expiration().ok_or(ClaimsError::InvalidClaim("exp"))?;
        // A token exactly at its (skew-adjusted) expiry is expired.
        if now >= exp.saturating_add(skew) {
            return Err(ClaimsError::Expired { exp, now });
        }

        if claims.get("nbf").is_some() {
            let nbf = claims.not_before().ok_or(ClaimsError::InvalidClaim("nbf"))?;
            if now.saturating_add(skew) < nbf {
                return Err(ClaimsError::NotYetValid { nbf, now });
            }
        }

        if claims.get("iat").is_some() {
            let iat = claims.issued_at().ok_or(ClaimsError::InvalidClaim("iat"))?;
            if iat > now.saturating_add(skew) {
                return Err(ClaimsError::IssuedInFuture { iat, now });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::jwt::TokenHeader;
    use jsonwebtoken::Algorithm;
    use serde_json::{json, Value};

    const ISSUER: &str = "https://issuer.example";
    const AUDIENCE: &str = "api://test";
    const NOW: i64 = 1_700_000_000;

    fn claims(value: Value) -> TokenClaims {
        let Value::Object(map) = value else {
            unreachable!("claims literal is an object")
        };
        TokenClaims::from_map(map)
    }

    fn valid_claims() -> Value {
        json!({
            "iss": ISSUER,
            "sub": "user-1",
            "aud": AUDIENCE,
            "exp": NOW + 3600,
            "iat": NOW,
            "roles": ["reader"],
        })
    }

    fn with(mut value: Value, name: &str, claim: Value) -> Value {
        value.as_object_mut().unwrap().insert(name.to_string(), claim);
        value
    }

    fn without(mut value: Value, name: &str) -> Value {
        value.as_object_mut().unwrap().remove(name);
        value
    }

    fn validator(skew_seconds: u64) -> ClaimsValidator {
        ClaimsValidator::new(ISSUER, AUDIENCE, Duration::from_secs(skew_seconds))
    }

    fn verified(value: Value) -> VerifiedToken {
        VerifiedToken::new(
            TokenHeader {
                algorithm: "ES256".to_string(),
                key_id: Some("key-1".to_string()),
                token_type: Some("JWT".to_string()),
            },
            claims(value),
            Algorithm::ES256,
            "key-1".to_string(),
        )
    }

    #[test]
    fn test_valid_claims_pass() {
        assert_eq!(validator(60).check_at(&claims(valid_claims()), NOW), Ok(()));
    }

    #[test]
    fn test_issuer_must_match_exactly() {
        let v = validator(60);
        for issuer in [
            "https://issuer.example/",
            "HTTPS://ISSUER.EXAMPLE",
            "https://evil.example",
        ] {
            let err = v
                .check_at(&claims(with(valid_claims(), "iss", json!(issuer))), NOW)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::IssuerMismatch, "issuer {issuer}");
        }
    }

    #[test]
    fn test_required_claims() {
        let v = validator(60);
        for name in ["iss", "aud", "exp"] {
            let err = v.check_at(&claims(without(valid_claims(), name)), NOW).unwrap_err();
            assert_eq!(err, ClaimsError::MissingClaim(name));
            assert_eq!(err.kind(), ErrorKind::MissingRequiredClaim);
        }
    }

    #[test]
    fn test_wrong_typed_claims_are_not_defaulted() {
        let v = validator(60);
        let cases = [
            ("iss", json!(42)),
            ("aud", json!([])),
            ("aud", json!(["api://test", 7])),
            ("exp", json!("tomorrow")),
            ("nbf", json!(true)),
            ("iat", json!({"at": 1})),
        ];
        for (name, value) in cases {
            let err = v
                .check_at(&claims(with(valid_claims(), name, value)), NOW)
                .unwrap_err();
            assert!(matches!(err, ClaimsError::InvalidClaim(_)), "claim {name}");
            assert_eq!(err.kind(), ErrorKind::MissingRequiredClaim);
        }
    }

    #[test]
    fn test_check_order_issuer_before_audience_before_time() {
        let v = validator(0);
        let everything_wrong = json!({
            "iss": "https://evil.example",
            "aud": "api://other",
            "exp": NOW - 10,
        });
        assert_eq!(
            v.check_at(&claims(everything_wrong.clone()), NOW).unwrap_err().kind(),
            ErrorKind::IssuerMismatch
        );
        assert_eq!(
            v.check_at(&claims(with(everything_wrong, "iss", json!(ISSUER))), NOW)
                .unwrap_err()
                .kind(),
            ErrorKind::AudienceMismatch
        );
    }

    #[test]
    fn test_audience_list() {
        let v = validator(60);
        let c = claims(with(valid_claims(), "aud", json!(["api://other", AUDIENCE])));
        assert_eq!(v.check_at(&c, NOW), Ok(()));

        let c = claims(with(valid_claims(), "aud", json!(["api://other"])));
        assert_eq!(v.check_at(&c, NOW), Err(ClaimsError::AudienceMismatch));
    }

    #[test]
    fn test_audience_case_sensitivity_is_configurable() {
        let c = claims(with(valid_claims(), "aud", json!("API://TEST")));

        assert_eq!(
            validator(60).check_at(&c, NOW),
            Err(ClaimsError::AudienceMismatch)
        );
        assert_eq!(
            validator(60)
                .with_audience_matching(false, true)
                .check_at(&c, NOW),
            Ok(())
        );
    }

    #[test]
    fn test_multiple_audiences_can_be_refused() {
        let c = claims(with(valid_claims(), "aud", json!([AUDIENCE, "api://other"])));
        let v = validator(60).with_audience_matching(true, false);
        assert_eq!(v.check_at(&c, NOW), Err(ClaimsError::MultipleAudiences(2)));

        let single = claims(with(valid_claims(), "aud", json!([AUDIENCE])));
        assert_eq!(v.check_at(&single, NOW), Ok(()));
    }

    #[test]
    fn test_expiry_exactly_now_is_expired() {
        let c = claims(with(valid_claims(), "exp", json!(NOW)));
        assert_eq!(
            validator(0).check_at(&c, NOW),
            Err(ClaimsError::Expired { exp: NOW, now: NOW })
        );

        let c = claims(with(valid_claims(), "exp", json!(NOW + 1)));
        assert_eq!(validator(0).check_at(&c, NOW), Ok(()));
    }

    #[test]
    fn test_expiry_within_skew_passes() {
        let v = validator(60);

        let c = claims(with(valid_claims(), "exp", json!(NOW - 59)));
        assert_eq!(v.check_at(&c, NOW), Ok(()));

        let c = claims(with(valid_claims(), "exp", json!(NOW - 60)));
        assert_eq!(v.check_at(&c, NOW).unwrap_err().kind(), ErrorKind::Expired);
    }

    #[test]
    fn test_not_before() {
        let v = validator(60);

        let c = claims(with(valid_claims(), "nbf", json!(NOW + 60)));
        assert_eq!(v.check_at(&c, NOW), Ok(()), "nbf within skew is accepted");

        let c = claims(with(valid_claims(), "nbf", json!(NOW + 61)));
        assert_eq!(
            v.check_at(&c, NOW),
            Err(ClaimsError::NotYetValid { nbf: NOW + 61, now: NOW })
        );
    }

    #[test]
    fn test_issued_in_future() {
        let v = validator(60);

        let c = claims(with(valid_claims(), "iat", json!(NOW + 60)));
        assert_eq!(v.check_at(&c, NOW), Ok(()));

        let c = claims(with(valid_claims(), "iat", json!(NOW + 3600)));
        let err = v.check_at(&c, NOW).unwrap_err();
        assert!(matches!(err, ClaimsError::IssuedInFuture { .. }));
        assert_eq!(err.kind(), ErrorKind::NotYetValid);
    }

    #[test]
    fn test_extreme_timestamps_do_not_overflow() {
        let v = validator(600);

        let c = claims(with(valid_claims(), "exp", json!(i64::MIN)));
        assert_eq!(v.check_at(&c, NOW).unwrap_err().kind(), ErrorKind::Expired);

        let c = claims(with(
            with(valid_claims(), "exp", json!(i64::MAX)),
            "nbf",
            json!(i64::MAX),
        ));
        assert_eq!(v.check_at(&c, NOW).unwrap_err().kind(), ErrorKind::NotYetValid);

        let c = claims(with(valid_claims(), "iat", json!(i64::MAX)));
        assert_eq!(v.check_at(&c, i64::MAX - 1).unwrap_err().kind(), ErrorKind::Expired);
    }

    #[test]
    fn test_validate_builds_identity() {
        let v = validator(60).with_role_claims(vec!["roles".to_string(), "scope".to_string()]);
        let token = verified(with(valid_claims(), "scope", json!("openid writer")));

        let identity = v.validate_at(token, NOW).unwrap();

        assert_eq!(identity.subject(), Some("user-1"));
        assert_eq!(identity.issuer(), ISSUER);
        assert_eq!(identity.audiences(), &[AUDIENCE.to_string()]);
        assert_eq!(identity.expires_at().timestamp(), NOW + 3600);
        assert_eq!(
            identity.roles().iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["openid", "reader", "writer"]
        );
        assert_eq!(identity.key_id(), "key-1");
    }

    #[test]
    fn test_case_insensitive_audience_passes_policy() {
        let v = validator(60).with_audience_matching(false, true);
        let token = verified(with(valid_claims(), "aud", json!("API://TEST")));

        let identity = v.validate_at(token, NOW).unwrap();

        assert!(identity.has_audience(AUDIENCE));
        assert_eq!(
            crate::auth::policy::authorize(
                &identity,
                &crate::auth::policy::PolicyDescriptor::any_of(AUDIENCE, ["reader"]),
            ),
            Ok(())
        );
    }

    #[test]
    fn test_validate_rejects_out_of_range_expiry() {
        // Passes the time check but cannot be represented as a timestamp.
        let token = verified(with(valid_claims(), "exp", json!(i64::MAX)));
        assert_eq!(
            validator(60).validate_at(token, NOW).unwrap_err(),
            ClaimsError::InvalidClaim("exp")
        );
    }

    #[test]
    fn test_nested_role_claim() {
        let v = validator(60).with_role_claims(vec!["realm_access.roles".to_string()]);
        let c = claims(with(
            valid_claims(),
            "realm_access",
            json!({"roles": ["admin", "auditor"]}),
        ));
        let roles = v.extract_roles(&c);
        assert!(roles.contains("admin"));
        assert!(roles.contains("auditor"));
        assert!(!roles.contains("reader"));
    }

    #[test]
    fn test_from_config() {
        let config = ValidatorConfig::new(ISSUER, AUDIENCE)
            .with_clock_skew(Duration::ZERO)
            .with_audience_case_sensitive(false);
        let v = ClaimsValidator::from_config(&config);

        let c = claims(with(valid_claims(), "aud", json!("API://test")));
        assert_eq!(v.check_at(&c, NOW), Ok(()));

        let c = claims(with(valid_claims(), "exp", json!(NOW)));
        assert_eq!(v.check_at(&c, NOW).unwrap_err().kind(), ErrorKind::Expired);
    }
}
