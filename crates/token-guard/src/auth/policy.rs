//! Per-operation authorization.
//!
//! [`authorize`] is a pure function of a validated identity and the
//! operation's [`PolicyDescriptor`]. Policies are supplied per call and never
//! cached, so no policy state is shared across requests.
//!
//! Evaluation order is fixed: audience first, then roles.

use crate::auth::identity::ValidatedIdentity;
use crate::errors::ErrorKind;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// How required roles are matched against the identity's roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoleMatch {
    /// At least one required role must be held. An empty requirement denies.
    #[default]
    AnyOf,
    /// Every required role must be held. An empty requirement allows.
    AllOf,
}

impl fmt::Display for RoleMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RoleMatch::AnyOf => "any-of",
            RoleMatch::AllOf => "all-of",
        })
    }
}

/// Authorization requirements of one protected operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDescriptor {
    /// Roles to match according to `mode`.
    pub required_roles: BTreeSet<String>,

    /// Role matching mode.
    pub mode: RoleMatch,

    /// Audience the identity must carry, matched with the validator's
    /// audience case rule.
    pub required_audience: String,
}

impl PolicyDescriptor {
    pub fn new<S: Into<String>>(
        required_audience: impl Into<String>,
        mode: RoleMatch,
        required_roles: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            required_roles: required_roles.into_iter().map(Into::into).collect(),
            mode,
            required_audience: required_audience.into(),
        }
    }

    /// Allow identities holding at least one of `roles`.
    pub fn any_of<S: Into<String>>(
        required_audience: impl Into<String>,
        roles: impl IntoIterator<Item = S>,
    ) -> Self {
        Self::new(required_audience, RoleMatch::AnyOf, roles)
    }

    /// Allow identities holding all of `roles`.
    pub fn all_of<S: Into<String>>(
        required_audience: impl Into<String>,
        roles: impl IntoIterator<Item = S>,
    ) -> Self {
        Self::new(required_audience, RoleMatch::AllOf, roles)
    }

    /// Allow any authenticated identity carrying `required_audience`.
    pub fn authenticated(required_audience: impl Into<String>) -> Self {
        Self::new(required_audience, RoleMatch::AllOf, Vec::<String>::new())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("identity is not issued for audience '{required}'")]
    AudienceNotAuthorized { required: String },

    #[error("identity lacks required roles ({mode}: {missing:?})")]
    InsufficientRole {
        mode: RoleMatch,
        missing: Vec<String>,
    },
}

impl AuthzError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthzError::AudienceNotAuthorized { .. } => ErrorKind::AudienceNotAuthorized,
            AuthzError::InsufficientRole { .. } => ErrorKind::InsufficientRole,
        }
    }
}

/// Decide whether `identity` may perform the operation guarded by `policy`.
///
/// # Errors
///
/// - `AudienceNotAuthorized` if the identity does not carry the policy's audience
/// - `InsufficientRole` if the roles do not satisfy the policy's mode
pub fn authorize(
    identity: &ValidatedIdentity,
    policy: &PolicyDescriptor,
) -> Result<(), AuthzError> {
    if !identity.has_audience(&policy.required_audience) {
        tracing::debug!(
            target: "guard.policy",
            required_audience = %policy.required_audience,
            "Authorization denied: audience not authorized"
        );
        return Err(AuthzError::AudienceNotAuthorized {
            required: policy.required_audience.clone(),
        });
    }

    let held = identity.roles();
    let allowed = match policy.mode {
        RoleMatch::AnyOf => !policy.required_roles.is_disjoint(held),
        RoleMatch::AllOf => policy.required_roles.is_subset(held),
    };

    if !allowed {
        let missing: Vec<String> = policy.required_roles.difference(held).cloned().collect();
        tracing::debug!(
            target: "guard.policy",
            mode = %policy.mode,
            missing = ?missing,
            "Authorization denied: insufficient role"
        );
        return Err(AuthzError::InsufficientRole {
            mode: policy.mode,
            missing,
        });
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use common::jwt::TokenClaims;
    use jsonwebtoken::Algorithm;
    use serde_json::{json, Value};

    const AUDIENCE: &str = "api://test";

    fn identity(audience: Value, roles: &[&str]) -> ValidatedIdentity {
        let Value::Object(map) = json!({
            "iss": "https://issuer.example",
            "sub": "user-1",
            "aud": audience,
        }) else {
            unreachable!("claims literal is an object")
        };
        ValidatedIdentity::new(
            TokenClaims::from_map(map),
            roles.iter().map(ToString::to_string).collect(),
            DateTime::from_timestamp(2_000_000_000, 0).unwrap(),
            "key-1".to_string(),
            Algorithm::RS256,
        )
    }

    #[test]
    fn test_reader_scenario() {
        let reader = identity(json!(AUDIENCE), &["reader"]);

        assert_eq!(
            authorize(&reader, &PolicyDescriptor::any_of(AUDIENCE, ["reader", "writer"])),
            Ok(())
        );

        let err = authorize(&reader, &PolicyDescriptor::all_of(AUDIENCE, ["reader", "writer"]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientRole);
        assert_eq!(
            err,
            AuthzError::InsufficientRole {
                mode: RoleMatch::AllOf,
                missing: vec!["writer".to_string()],
            }
        );
    }

    #[test]
    fn test_any_of() {
        let id = identity(json!(AUDIENCE), &["auditor", "reader"]);
        assert!(authorize(&id, &PolicyDescriptor::any_of(AUDIENCE, ["reader"])).is_ok());
        assert!(authorize(&id, &PolicyDescriptor::any_of(AUDIENCE, ["admin", "auditor"])).is_ok());
        assert!(authorize(&id, &PolicyDescriptor::any_of(AUDIENCE, ["admin"])).is_err());
    }

    #[test]
    fn test_all_of() {
        let id = identity(json!(AUDIENCE), &["auditor", "reader", "writer"]);
        assert!(authorize(&id, &PolicyDescriptor::all_of(AUDIENCE, ["reader", "writer"])).is_ok());
        assert!(authorize(&id, &PolicyDescriptor::all_of(AUDIENCE, ["reader", "admin"])).is_err());
    }

    #[test]
    fn test_empty_requirements() {
        let nobody = identity(json!(AUDIENCE), &[]);

        assert!(
            authorize(&nobody, &PolicyDescriptor::any_of(AUDIENCE, Vec::<String>::new())).is_err(),
            "Any-of with nothing to match must deny"
        );
        assert!(
            authorize(&nobody, &PolicyDescriptor::all_of(AUDIENCE, Vec::<String>::new())).is_ok()
        );
        assert!(authorize(&nobody, &PolicyDescriptor::authenticated(AUDIENCE)).is_ok());
    }

    #[test]
    fn test_role_matching_is_exact() {
        let id = identity(json!(AUDIENCE), &["Reader"]);
        assert!(authorize(&id, &PolicyDescriptor::any_of(AUDIENCE, ["reader"])).is_err());
    }

    #[test]
    fn test_audience_checked_before_roles() {
        let id = identity(json!("api://other"), &[]);
        let err = authorize(&id, &PolicyDescriptor::all_of(AUDIENCE, ["admin"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AudienceNotAuthorized);
    }

    #[test]
    fn test_audience_among_many() {
        let id = identity(json!(["api://other", AUDIENCE]), &["reader"]);
        assert!(authorize(&id, &PolicyDescriptor::any_of(AUDIENCE, ["reader"])).is_ok());
        assert!(authorize(&id, &PolicyDescriptor::any_of("api://third", ["reader"])).is_err());
    }

    #[test]
    fn test_decisions_are_deterministic() {
        let id = identity(json!(AUDIENCE), &["reader"]);
        let policy = PolicyDescriptor::all_of(AUDIENCE, ["reader", "writer"]);
        let first = authorize(&id, &policy);
        for _ in 0..10 {
            assert_eq!(authorize(&id, &policy), first);
        }
    }

    #[test]
    fn test_role_match_default_and_display() {
        assert_eq!(RoleMatch::default(), RoleMatch::AnyOf);
        assert_eq!(RoleMatch::AllOf.to_string(), "all-of");
    }
}
