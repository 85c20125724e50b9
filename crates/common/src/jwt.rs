//! Compact JWT parsing shared across Token Guard crates.
//!
//! This module turns a compact-serialized token (`header.payload.signature`)
//! into its decoded parts without making any trust decisions:
//! - Size limits for DoS prevention
//! - Clock skew constants used by claim validation
//! - Structural decoding of the header and claims segments
//! - Typed accessors over the dynamic claims mapping
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE any decoding (DoS prevention)
//! - A token that parses successfully is still UNTRUSTED; only signature
//!   verification turns it into something a caller may act on
//! - The signing input is kept exactly as received so that verification never
//!   depends on a re-serialization of decoded JSON
//! - The raw token is held as a secret and redacted in Debug output
//!
//! # Usage
//!
//! ```rust
//! use common::jwt::{parse, RawToken};
//!
//! let token = RawToken::new("eyJhbGciOiJSUzI1NiJ9.eyJzdWIiOiJ1In0.c2ln");
//! let parsed = parse(&token).unwrap();
//!
//! assert_eq!(parsed.header().algorithm, "RS256");
//! assert_eq!(parsed.claims().subject(), Some("u"));
//! assert_eq!(parsed.signature(), b"sig");
//! ```

use crate::secret::{ExposeSecret, SecretString};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// JWTs larger than this size are rejected BEFORE any base64 decoding or JSON
/// parsing. Typical provider-issued access tokens are 800-2000 bytes; 8KB
/// leaves room for large role lists while bounding per-request allocation.
pub const MAX_JWT_SIZE_BYTES: usize = 8192; // 8KB

/// Default JWT clock skew tolerance (60 seconds).
///
/// Applied symmetrically to `exp`, `nbf` and `iat` checks to absorb clock
/// drift between the identity provider and this process.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(60);

/// Maximum allowed JWT clock skew tolerance (10 minutes).
///
/// Configuration above this bound is rejected; a large tolerance silently
/// extends the lifetime of every token.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

/// Number of dot-separated segments in a compact JWS.
const SEGMENT_COUNT: usize = 3;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while parsing a compact token.
///
/// Every variant maps to the same "malformed token" outcome for callers. The
/// variants exist so that the detailed reason can be logged server-side.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Token size exceeds [`MAX_JWT_SIZE_BYTES`].
    #[error("token exceeds maximum size of {MAX_JWT_SIZE_BYTES} bytes ({0} bytes)")]
    TokenTooLarge(usize),

    /// Token does not have exactly three segments.
    #[error("token has {0} segments, expected 3")]
    WrongSegmentCount(usize),

    /// One of the segments is empty.
    #[error("token {0} segment is empty")]
    EmptySegment(Segment),

    /// A segment is not valid unpadded base64url.
    #[error("token {0} segment is not valid base64url")]
    InvalidEncoding(Segment),

    /// Header or payload is not a JSON object.
    #[error("token {0} segment is not a JSON object")]
    InvalidJson(Segment),

    /// Header lacks a string `alg` member, or `kid`/`typ` are not strings.
    #[error("token header is invalid: {0}")]
    InvalidHeader(&'static str),
}

/// Identifies a segment of the compact serialization in error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    /// First segment (JOSE header).
    Header,
    /// Second segment (claims set).
    Payload,
    /// Third segment (signature).
    Signature,
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Segment::Header => "header",
            Segment::Payload => "payload",
            Segment::Signature => "signature",
        })
    }
}

// =============================================================================
// Raw Token
// =============================================================================

/// A bearer token exactly as presented by the caller.
///
/// Immutable once constructed. The contents are redacted in Debug output.
pub struct RawToken(SecretString);

impl RawToken {
    /// Wrap a presented token string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    /// Borrow the token text.
    ///
    /// Callers must not log the returned value.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Length of the token in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.expose().len()
    }

    /// Whether the token is the empty string.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }
}

impl fmt::Debug for RawToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RawToken").field(&"[REDACTED]").finish()
    }
}

impl From<&str> for RawToken {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for RawToken {
    fn from(token: String) -> Self {
        Self::new(token)
    }
}

// =============================================================================
// Header
// =============================================================================

/// Decoded JOSE header. Untrusted until the signature is verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHeader {
    /// The `alg` member exactly as written (may be `none` or unknown).
    pub algorithm: String,

    /// The `kid` member, if present and non-empty.
    pub key_id: Option<String>,

    /// The `typ` member, if present.
    pub token_type: Option<String>,
}

impl TokenHeader {
    fn from_object(object: &Map<String, Value>) -> Result<Self, ParseError> {
        let algorithm = object
            .get("alg")
            .and_then(Value::as_str)
            .filter(|alg| !alg.is_empty())
            .ok_or(ParseError::InvalidHeader("missing or non-string alg"))?
            .to_string();

        let key_id = optional_string(object, "kid")
            .map_err(|()| ParseError::InvalidHeader("non-string kid"))?
            .filter(|kid| !kid.is_empty());

        let token_type = optional_string(object, "typ")
            .map_err(|()| ParseError::InvalidHeader("non-string typ"))?;

        Ok(Self {
            algorithm,
            key_id,
            token_type,
        })
    }
}

/// `Ok(None)` when absent or null, `Err` when present with a non-string type.
fn optional_string(object: &Map<String, Value>, name: &str) -> Result<Option<String>, ()> {
    match object.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(()),
    }
}

// =============================================================================
// Claims
// =============================================================================

/// Decoded claims set. Untrusted until the full pipeline succeeds.
///
/// Claims are kept as a string-keyed JSON mapping so that provider-specific
/// claims pass through untouched. The registered claims have typed accessors;
/// an accessor returns `None` when the claim is absent OR has the wrong JSON
/// type, so a malformed claim is never mistaken for a valid one.
#[derive(Clone, PartialEq)]
pub struct TokenClaims(Map<String, Value>);

impl TokenClaims {
    /// Wrap an already-decoded claims object.
    #[must_use]
    pub fn from_map(claims: Map<String, Value>) -> Self {
        Self(claims)
    }

    /// Look up a top-level claim.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Look up a claim by dotted path (e.g. `realm_access.roles`).
    ///
    /// A top-level claim whose name itself contains dots wins over the nested
    /// interpretation.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        if let Some(value) = self.0.get(path) {
            return Some(value);
        }
        let mut parts = path.split('.');
        let first = parts.next()?;
        parts.try_fold(self.0.get(first)?, |value, part| value.get(part))
    }

    /// `iss` claim.
    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.get("iss").and_then(Value::as_str)
    }

    /// `sub` claim.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.get("sub").and_then(Value::as_str)
    }

    /// `aud` claim, normalized to a list.
    ///
    /// Returns `None` when the claim is absent, empty, or contains anything
    /// other than strings.
    #[must_use]
    pub fn audiences(&self) -> Option<Vec<&str>> {
        let audiences = match self.get("aud")? {
            Value::String(single) => vec![single.as_str()],
            Value::Array(many) => many
                .iter()
                .map(Value::as_str)
                .collect::<Option<Vec<_>>>()?,
            _ => return None,
        };
        if audiences.is_empty() {
            return None;
        }
        Some(audiences)
    }

    /// `exp` claim (Unix epoch seconds).
    #[must_use]
    pub fn expiration(&self) -> Option<i64> {
        self.get("exp").and_then(numeric_date)
    }

    /// `iat` claim (Unix epoch seconds).
    #[must_use]
    pub fn issued_at(&self) -> Option<i64> {
        self.get("iat").and_then(numeric_date)
    }

    /// `nbf` claim (Unix epoch seconds).
    #[must_use]
    pub fn not_before(&self) -> Option<i64> {
        self.get("nbf").and_then(numeric_date)
    }

    /// Collect a set-of-strings claim at `path`.
    ///
    /// Accepts a JSON array (non-string members are skipped) or a
    /// space-delimited string as used by the OAuth `scope` claim. Anything
    /// else yields an empty set.
    #[must_use]
    pub fn string_set(&self, path: &str) -> BTreeSet<String> {
        match self.get_path(path) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect(),
            Some(Value::String(joined)) => joined
                .split_whitespace()
                .map(ToString::to_string)
                .collect(),
            _ => BTreeSet::new(),
        }
    }

    /// Borrow the full claims mapping.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Take ownership of the full claims mapping.
    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

/// Claim values may identify users; Debug output lists claim names only.
impl fmt::Debug for TokenClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenClaims")
            .field("names", &self.0.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// RFC 7519 NumericDate: integer or fractional seconds. Fractions truncate.
// Range-checked against i64 bounds before truncation.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn numeric_date(value: &Value) -> Option<i64> {
    if let Some(secs) = value.as_i64() {
        return Some(secs);
    }
    let secs = value.as_f64().filter(|f| f.is_finite())?;
    if secs >= i64::MIN as f64 && secs <= i64::MAX as f64 {
        Some(secs.trunc() as i64)
    } else {
        None
    }
}

// =============================================================================
// Parsed Token
// =============================================================================

/// A structurally valid token. Parsing establishes shape, not trust.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedToken {
    header: TokenHeader,
    claims: TokenClaims,
    signing_input: String,
    signature_b64: String,
    signature: Vec<u8>,
}

impl ParsedToken {
    /// Decoded header.
    #[must_use]
    pub fn header(&self) -> &TokenHeader {
        &self.header
    }

    /// Decoded claims.
    #[must_use]
    pub fn claims(&self) -> &TokenClaims {
        &self.claims
    }

    /// `header.payload` exactly as received; the bytes the signature covers.
    #[must_use]
    pub fn signing_input(&self) -> &[u8] {
        self.signing_input.as_bytes()
    }

    /// Signature segment in its original base64url form.
    #[must_use]
    pub fn signature_b64(&self) -> &str {
        &self.signature_b64
    }

    /// Decoded signature bytes.
    #[must_use]
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Split into header and claims, dropping the signature material.
    #[must_use]
    pub fn into_parts(self) -> (TokenHeader, TokenClaims) {
        (self.header, self.claims)
    }
}

// =============================================================================
// Functions
// =============================================================================

/// Parse a compact-serialized token without verifying it.
///
/// # Errors
///
/// Returns a [`ParseError`] when the token is oversized, does not have exactly
/// three non-empty segments, contains non-base64url data, or its header or
/// payload is not a JSON object.
pub fn parse(token: &RawToken) -> Result<ParsedToken, ParseError> {
    parse_str(token.expose())
}

/// Parse a compact-serialized token given as a plain string.
///
/// Same as [`parse`]; prefer [`parse`] when the token came from a request.
///
/// # Errors
///
/// See [`parse`].
pub fn parse_str(token: &str) -> Result<ParsedToken, ParseError> {
    // Check token size first (DoS prevention)
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(ParseError::TokenTooLarge(token.len()));
    }

    let segments: Vec<&str> = token.split('.').collect();
    let [header_b64, payload_b64, signature_b64] = segments.as_slice() else {
        tracing::debug!(
            target: "common.jwt",
            segments = segments.len(),
            "Token rejected: invalid compact serialization"
        );
        return Err(ParseError::WrongSegmentCount(segments.len()));
    };

    let header = decode_object(header_b64, Segment::Header)?;
    let claims = decode_object(payload_b64, Segment::Payload)?;
    let signature = decode_segment(signature_b64, Segment::Signature)?;

    let header = TokenHeader::from_object(&header).inspect_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Token rejected: invalid header");
    })?;

    // The signing input is the first two segments exactly as received.
    let signing_input_len = header_b64.len() + 1 + payload_b64.len();
    let signing_input = token
        .get(..signing_input_len)
        .ok_or(ParseError::WrongSegmentCount(SEGMENT_COUNT))?
        .to_string();

    Ok(ParsedToken {
        header,
        claims: TokenClaims(claims),
        signing_input,
        signature_b64: (*signature_b64).to_string(),
        signature,
    })
}

fn decode_segment(segment: &str, which: Segment) -> Result<Vec<u8>, ParseError> {
    if segment.is_empty() {
        tracing::debug!(target: "common.jwt", segment = %which, "Token rejected: empty segment");
        return Err(ParseError::EmptySegment(which));
    }
    URL_SAFE_NO_PAD.decode(segment).map_err(|e| {
        tracing::debug!(
            target: "common.jwt",
            segment = %which,
            error = %e,
            "Failed to decode token segment base64url"
        );
        ParseError::InvalidEncoding(which)
    })
}

fn decode_object(segment: &str, which: Segment) -> Result<Map<String, Value>, ParseError> {
    let bytes = decode_segment(segment, which)?;
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(_) => {
            tracing::debug!(
                target: "common.jwt",
                segment = %which,
                "Token segment is not a JSON object"
            );
            Err(ParseError::InvalidJson(which))
        }
        Err(e) => {
            tracing::debug!(
                target: "common.jwt",
                segment = %which,
                error = %e,
                "Failed to parse token segment JSON"
            );
            Err(ParseError::InvalidJson(which))
        }
    }
}

/// Encode bytes as unpadded base64url, the encoding used by every JWS segment.
#[must_use]
pub fn encode_segment(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compact(header: &Value, claims: &Value, signature: &[u8]) -> String {
        format!(
            "{}.{}.{}",
            encode_segment(header.to_string().as_bytes()),
            encode_segment(claims.to_string().as_bytes()),
            encode_segment(signature)
        )
    }

    fn header() -> Value {
        json!({"alg": "RS256", "typ": "JWT", "kid": "key-1"})
    }

    // -------------------------------------------------------------------------
    // Constants Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_max_jwt_size_is_8kb() {
        assert_eq!(MAX_JWT_SIZE_BYTES, 8192);
    }

    #[test]
    fn test_clock_skew_bounds() {
        assert_eq!(DEFAULT_CLOCK_SKEW, Duration::from_secs(60));
        assert!(DEFAULT_CLOCK_SKEW <= MAX_CLOCK_SKEW);
    }

    // -------------------------------------------------------------------------
    // parse Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_valid_token() {
        let token = compact(&header(), &json!({"sub": "user-1", "exp": 10}), b"sig");
        let parsed = parse_str(&token).unwrap();

        assert_eq!(parsed.header().algorithm, "RS256");
        assert_eq!(parsed.header().key_id.as_deref(), Some("key-1"));
        assert_eq!(parsed.header().token_type.as_deref(), Some("JWT"));
        assert_eq!(parsed.claims().subject(), Some("user-1"));
        assert_eq!(parsed.signature(), b"sig");
    }

    #[test]
    fn test_signing_input_is_exact_received_bytes() {
        // Whitespace and member order must survive: no re-serialization.
        let header_b64 = encode_segment(br#"{ "kid":"k", "alg" : "ES256" }"#);
        let payload_b64 = encode_segment(br#"{"b":1,   "a":2}"#);
        let token = format!("{header_b64}.{payload_b64}.c2ln");

        let parsed = parse_str(&token).unwrap();
        assert_eq!(
            parsed.signing_input(),
            format!("{header_b64}.{payload_b64}").as_bytes()
        );
        assert_eq!(parsed.signature_b64(), "c2ln");
    }

    #[test]
    fn test_parse_none_algorithm_is_not_a_parse_failure() {
        // Trust decisions belong to signature verification.
        let token = compact(&json!({"alg": "none"}), &json!({}), b"x");
        let parsed = parse_str(&token).unwrap();
        assert_eq!(parsed.header().algorithm, "none");
        assert!(parsed.header().key_id.is_none());
    }

    #[test]
    fn test_parse_wrong_segment_counts() {
        assert_eq!(parse_str(""), Err(ParseError::WrongSegmentCount(1)));
        assert_eq!(parse_str("single"), Err(ParseError::WrongSegmentCount(1)));
        assert_eq!(parse_str("only.two"), Err(ParseError::WrongSegmentCount(2)));
        assert_eq!(
            parse_str("not.a.valid.jwt"),
            Err(ParseError::WrongSegmentCount(4))
        );
    }

    #[test]
    fn test_parse_empty_segments() {
        let valid = compact(&header(), &json!({}), b"sig");
        let parts: Vec<&str> = valid.split('.').collect();

        assert_eq!(
            parse_str(&format!(".{}.{}", parts[1], parts[2])),
            Err(ParseError::EmptySegment(Segment::Header))
        );
        assert_eq!(
            parse_str(&format!("{}..{}", parts[0], parts[2])),
            Err(ParseError::EmptySegment(Segment::Payload))
        );
        assert_eq!(
            parse_str(&format!("{}.{}.", parts[0], parts[1])),
            Err(ParseError::EmptySegment(Segment::Signature))
        );
    }

    #[test]
    fn test_parse_invalid_base64() {
        assert_eq!(
            parse_str("!!!invalid!!!.payload.signature"),
            Err(ParseError::InvalidEncoding(Segment::Header))
        );
    }

    #[test]
    fn test_parse_rejects_padded_base64() {
        // Compact JWS forbids padding; standard-alphabet padding is unsupported.
        let header_b64 = encode_segment(header().to_string().as_bytes());
        let token = format!("{header_b64}.e30=.c2ln");
        assert_eq!(
            parse_str(&token),
            Err(ParseError::InvalidEncoding(Segment::Payload))
        );
    }

    #[test]
    fn test_parse_truncated_signature_segment() {
        // A single base64url character cannot encode a whole byte.
        let header_b64 = encode_segment(header().to_string().as_bytes());
        let token = format!("{header_b64}.e30.A");
        assert_eq!(
            parse_str(&token),
            Err(ParseError::InvalidEncoding(Segment::Signature))
        );
    }

    #[test]
    fn test_parse_non_object_json() {
        let header_b64 = encode_segment(header().to_string().as_bytes());
        let token = format!("{}.{}.c2ln", header_b64, encode_segment(b"[1,2,3]"));
        assert_eq!(
            parse_str(&token),
            Err(ParseError::InvalidJson(Segment::Payload))
        );

        let token = format!("{}.e30.c2ln", encode_segment(b"not json"));
        assert_eq!(
            parse_str(&token),
            Err(ParseError::InvalidJson(Segment::Header))
        );
    }

    #[test]
    fn test_parse_header_requires_string_alg() {
        let token = compact(&json!({"kid": "k"}), &json!({}), b"s");
        assert!(matches!(parse_str(&token), Err(ParseError::InvalidHeader(_))));

        let token = compact(&json!({"alg": 256}), &json!({}), b"s");
        assert!(matches!(parse_str(&token), Err(ParseError::InvalidHeader(_))));
    }

    #[test]
    fn test_parse_header_kid_variants() {
        let token = compact(&json!({"alg": "RS256", "kid": 12345}), &json!({}), b"s");
        assert!(matches!(parse_str(&token), Err(ParseError::InvalidHeader(_))));

        let token = compact(&json!({"alg": "RS256", "kid": null}), &json!({}), b"s");
        assert!(parse_str(&token).unwrap().header().key_id.is_none());

        let token = compact(&json!({"alg": "RS256", "kid": ""}), &json!({}), b"s");
        assert!(
            parse_str(&token).unwrap().header().key_id.is_none(),
            "Empty kid should be treated as absent"
        );
    }

    #[test]
    fn test_parse_oversized_token() {
        let oversized = "a".repeat(MAX_JWT_SIZE_BYTES + 1);
        assert_eq!(
            parse_str(&oversized),
            Err(ParseError::TokenTooLarge(MAX_JWT_SIZE_BYTES + 1))
        );
    }

    #[test]
    fn test_parse_at_size_limit_reaches_decoding() {
        let header_b64 = encode_segment(header().to_string().as_bytes());
        let remaining = MAX_JWT_SIZE_BYTES - header_b64.len() - 2;
        let token = format!("{}.{}.", header_b64, "a".repeat(remaining));
        assert_eq!(token.len(), MAX_JWT_SIZE_BYTES);

        // Not rejected for size; fails later while decoding segments.
        let result = parse_str(&token);
        assert!(result.is_err());
        assert!(!matches!(result, Err(ParseError::TokenTooLarge(_))));
    }

    // -------------------------------------------------------------------------
    // Claims Tests
    // -------------------------------------------------------------------------

    fn claims(value: Value) -> TokenClaims {
        match value {
            Value::Object(map) => TokenClaims::from_map(map),
            _ => panic!("claims must be an object"),
        }
    }

    #[test]
    fn test_audiences_single_and_many() {
        assert_eq!(
            claims(json!({"aud": "api://a"})).audiences(),
            Some(vec!["api://a"])
        );
        assert_eq!(
            claims(json!({"aud": ["api://a", "api://b"]})).audiences(),
            Some(vec!["api://a", "api://b"])
        );
    }

    #[test]
    fn test_audiences_invalid_shapes() {
        assert_eq!(claims(json!({})).audiences(), None);
        assert_eq!(claims(json!({"aud": []})).audiences(), None);
        assert_eq!(claims(json!({"aud": ["a", 1]})).audiences(), None);
        assert_eq!(claims(json!({"aud": 7})).audiences(), None);
    }

    #[test]
    fn test_numeric_dates() {
        let c = claims(json!({"exp": 1_700_000_000, "iat": 1_699_999_000.75, "nbf": "soon"}));
        assert_eq!(c.expiration(), Some(1_700_000_000));
        assert_eq!(c.issued_at(), Some(1_699_999_000));
        assert_eq!(c.not_before(), None, "Non-numeric nbf should not parse");
        assert_eq!(claims(json!({"exp": 1e300})).expiration(), None);
    }

    #[test]
    fn test_issuer_wrong_type_is_absent() {
        assert_eq!(claims(json!({"iss": ["a"]})).issuer(), None);
        assert_eq!(claims(json!({"iss": "https://a"})).issuer(), Some("https://a"));
    }

    #[test]
    fn test_string_set_from_array_and_scope_string() {
        let c = claims(json!({
            "roles": ["reader", "writer", 3, ""],
            "scope": "openid  profile email",
        }));
        assert_eq!(
            c.string_set("roles").into_iter().collect::<Vec<_>>(),
            vec!["reader", "writer"]
        );
        assert_eq!(c.string_set("scope").len(), 3);
        assert!(c.string_set("missing").is_empty());
    }

    #[test]
    fn test_get_path_nested_and_literal() {
        let c = claims(json!({
            "realm_access": {"roles": ["admin"]},
            "dotted.name": "literal",
        }));
        assert_eq!(
            c.string_set("realm_access.roles").into_iter().collect::<Vec<_>>(),
            vec!["admin"]
        );
        assert_eq!(c.get_path("dotted.name"), Some(&json!("literal")));
        assert_eq!(c.get_path("realm_access.missing"), None);
    }

    #[test]
    fn test_unknown_claims_are_preserved() {
        let token = compact(
            &header(),
            &json!({"sub": "u", "tenant": {"id": 9}, "x-custom": true}),
            b"s",
        );
        let parsed = parse_str(&token).unwrap();
        let map = parsed.claims().as_map();
        assert_eq!(map.get("tenant"), Some(&json!({"id": 9})));
        assert_eq!(map.get("x-custom"), Some(&json!(true)));
        assert_eq!(parsed.claims().subject(), Some("u"));
    }

    // -------------------------------------------------------------------------
    // Redaction Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_raw_token_debug_redacts_contents() {
        let token = RawToken::new("eyJhbGciOiJSUzI1NiJ9.secret-payload.sig");
        let debug_str = format!("{token:?}");
        assert!(!debug_str.contains("secret-payload"));
        assert!(debug_str.contains("[REDACTED]"));
        assert_eq!(token.len(), 39);
    }

    #[test]
    fn test_claims_debug_lists_names_only() {
        let c = claims(json!({"sub": "secret-user-id", "exp": 1}));
        let debug_str = format!("{c:?}");
        assert!(!debug_str.contains("secret-user-id"));
        assert!(debug_str.contains("sub"));
    }
}
