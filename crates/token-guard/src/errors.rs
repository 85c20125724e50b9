//! Error taxonomy and pipeline rejections.
//!
//! Every stage of the pipeline has its own error enum; each maps onto a flat
//! [`ErrorKind`]. The pipeline wraps the first failure in a [`Rejection`]
//! carrying the stage it occurred in.
//!
//! Messages returned to clients are intentionally generic to avoid leaking
//! validation internals. The detailed reason is kept in
//! [`Rejection::message`] for server-side logging.

use std::fmt;

/// Generic client-facing message for authentication failures.
pub const INVALID_TOKEN_MESSAGE: &str = "The access token is invalid or expired";

/// Generic client-facing message for authorization failures.
pub const INSUFFICIENT_PERMISSIONS_MESSAGE: &str =
    "The access token does not grant access to this operation";

/// Flat failure taxonomy across all pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Structurally invalid token.
    MalformedToken,
    /// `alg` is `none`, unknown, or not allow-listed.
    UnsupportedAlgorithm,
    /// No signing key matches the token's `kid` and `alg`.
    KeyNotFound,
    /// The JWKS document could not be fetched or understood.
    FetchFailed,
    /// The signature does not verify under the resolved key.
    SignatureMismatch,
    /// `iss` differs from the expected issuer.
    IssuerMismatch,
    /// `aud` does not contain the expected audience.
    AudienceMismatch,
    /// `exp` has passed (including clock skew tolerance).
    Expired,
    /// `nbf` or `iat` lies in the future (beyond clock skew tolerance).
    NotYetValid,
    /// A required claim is absent or has the wrong type.
    MissingRequiredClaim,
    /// The identity lacks the roles the policy requires.
    InsufficientRole,
    /// The identity's audience does not include the operation's audience.
    AudienceNotAuthorized,
}

impl ErrorKind {
    /// Stable snake_case name, used for logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::MalformedToken => "malformed_token",
            ErrorKind::UnsupportedAlgorithm => "unsupported_algorithm",
            ErrorKind::KeyNotFound => "key_not_found",
            ErrorKind::FetchFailed => "fetch_failed",
            ErrorKind::SignatureMismatch => "signature_mismatch",
            ErrorKind::IssuerMismatch => "issuer_mismatch",
            ErrorKind::AudienceMismatch => "audience_mismatch",
            ErrorKind::Expired => "expired",
            ErrorKind::NotYetValid => "not_yet_valid",
            ErrorKind::MissingRequiredClaim => "missing_required_claim",
            ErrorKind::InsufficientRole => "insufficient_role",
            ErrorKind::AudienceNotAuthorized => "audience_not_authorized",
        }
    }

    /// Whether this is an authorization (403) rather than authentication
    /// (401) failure.
    pub fn is_authorization_failure(self) -> bool {
        matches!(
            self,
            ErrorKind::InsufficientRole | ErrorKind::AudienceNotAuthorized
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage at which a rejection occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// `Received -> Parsed`.
    Parsing,
    /// `Parsed -> SignatureVerified`.
    SignatureVerification,
    /// `SignatureVerified -> ClaimsValidated`.
    ClaimsValidation,
    /// `ClaimsValidated -> Authorized`.
    Authorization,
}

impl Stage {
    /// Stable snake_case name, used for logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Parsing => "parsing",
            Stage::SignatureVerification => "signature_verification",
            Stage::ClaimsValidation => "claims_validation",
            Stage::Authorization => "authorization",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of the validation pipeline.
///
/// Carries no identity data: a rejected token never exposes partially
/// validated claims.
///
/// `Display` yields the generic client-safe text. Use [`Rejection::message`]
/// for the detailed server-side reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    stage: Stage,
    kind: ErrorKind,
    message: String,
}

impl Rejection {
    pub(crate) fn new(stage: Stage, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: message.into(),
        }
    }

    /// Stage at which validation stopped.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Failure kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Detailed reason. Suitable for server-side logs only.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the caller is authenticated but not permitted.
    pub fn is_authorization_failure(&self) -> bool {
        self.kind.is_authorization_failure()
    }

    /// HTTP status code the embedding layer should return.
    ///
    /// - Authentication failures: 401 Unauthorized
    /// - Authorization failures: 403 Forbidden
    pub fn status_code(&self) -> u16 {
        if self.is_authorization_failure() {
            403
        } else {
            401
        }
    }

    /// Client-safe description.
    pub fn client_message(&self) -> &'static str {
        if self.is_authorization_failure() {
            INSUFFICIENT_PERMISSIONS_MESSAGE
        } else {
            INVALID_TOKEN_MESSAGE
        }
    }

    /// `WWW-Authenticate` header value per RFC 6750 section 3.
    pub fn www_authenticate(&self, realm: &str) -> String {
        let error = if self.is_authorization_failure() {
            "insufficient_scope"
        } else {
            "invalid_token"
        };
        format!("Bearer realm=\"{realm}\", error=\"{error}\"")
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.client_message())
    }
}

impl std::error::Error for Rejection {}
