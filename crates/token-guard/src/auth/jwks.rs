//! JWK document model and key set snapshots.
//!
//! A JWKS document is converted entry by entry into [`SigningKey`]s. Entries
//! that cannot be used for signature verification are skipped with a warning
//! so that a single odd key never poisons the whole document.
//!
//! # Security
//!
//! - Symmetric (`oct`) keys are never accepted from a published document
//! - Keys marked for encryption (`use` other than `sig`) are skipped
//! - A key only verifies algorithms of its own family; a JWK `alg` member
//!   further pins it to exactly that algorithm

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use thiserror::Error;

/// JSON Web Key as published by the identity provider.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type (`RSA`, `EC`, `OKP`, `oct`).
    pub kty: String,

    /// Key ID - used to select the correct key for verification.
    #[serde(default)]
    pub kid: Option<String>,

    /// Algorithm the key is restricted to, if any.
    #[serde(default)]
    pub alg: Option<String>,

    /// Key use (should be "sig" for signing).
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    /// Curve name for `EC` and `OKP` keys.
    #[serde(default)]
    pub crv: Option<String>,

    /// EC / OKP public x coordinate (base64url).
    #[serde(default)]
    pub x: Option<String>,

    /// EC public y coordinate (base64url).
    #[serde(default)]
    pub y: Option<String>,

    /// RSA modulus (base64url).
    #[serde(default)]
    pub n: Option<String>,

    /// RSA public exponent (base64url).
    #[serde(default)]
    pub e: Option<String>,
}

/// JWKS document. Keys are kept as raw JSON so each can be parsed on its own.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JwksDocument {
    /// List of JSON Web Keys.
    pub keys: Vec<serde_json::Value>,
}

/// Reason a JWK entry was skipped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JwkError {
    #[error("key entry is not a valid JWK: {0}")]
    Invalid(String),

    #[error("key has no kid")]
    MissingKeyId,

    #[error("key use '{0}' is not 'sig'")]
    NotForSigning(String),

    #[error("symmetric keys are not accepted")]
    Symmetric,

    #[error("unsupported key type '{0}'")]
    UnsupportedKeyType(String),

    #[error("unsupported curve '{0}'")]
    UnsupportedCurve(String),

    #[error("missing key parameter '{0}'")]
    MissingParameter(&'static str),

    #[error("unknown algorithm '{0}'")]
    UnknownAlgorithm(String),

    #[error("algorithm {0:?} does not belong to the key family")]
    AlgorithmMismatch(Algorithm),

    #[error("key material could not be decoded: {0}")]
    BadKeyMaterial(String),
}

/// Cryptographic family of a signing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyFamily {
    Rsa,
    EcP256,
    EcP384,
    Ed25519,
}

impl KeyFamily {
    /// Whether `algorithm` can be verified with a key of this family.
    pub fn supports(self, algorithm: Algorithm) -> bool {
        match self {
            KeyFamily::Rsa => matches!(
                algorithm,
                Algorithm::RS256
                    | Algorithm::RS384
                    | Algorithm::RS512
                    | Algorithm::PS256
                    | Algorithm::PS384
                    | Algorithm::PS512
            ),
            KeyFamily::EcP256 => algorithm == Algorithm::ES256,
            KeyFamily::EcP384 => algorithm == Algorithm::ES384,
            KeyFamily::Ed25519 => algorithm == Algorithm::EdDSA,
        }
    }
}

/// A public signing key owned by the key store.
///
/// Immutable after construction; rotation replaces the whole [`KeySet`].
#[derive(Clone)]
pub struct SigningKey {
    key_id: String,
    family: KeyFamily,
    algorithm: Option<Algorithm>,
    decoding_key: DecodingKey,
    fetched_at: DateTime<Utc>,
}

impl SigningKey {
    /// Build a signing key from a parsed JWK.
    pub fn from_jwk(jwk: &Jwk, fetched_at: DateTime<Utc>) -> Result<Self, JwkError> {
        let key_id = jwk
            .kid
            .as_deref()
            .filter(|kid| !kid.is_empty())
            .ok_or(JwkError::MissingKeyId)?
            .to_string();

        if let Some(key_use) = jwk.key_use.as_deref() {
            if key_use != "sig" {
                return Err(JwkError::NotForSigning(key_use.to_string()));
            }
        }

        let (family, decoding_key) = match jwk.kty.as_str() {
            "RSA" => {
                let n = required(&jwk.n, "n")?;
                let e = required(&jwk.e, "e")?;
                let key = DecodingKey::from_rsa_components(n, e)
                    .map_err(|e| JwkError::BadKeyMaterial(e.to_string()))?;
                (KeyFamily::Rsa, key)
            }
            "EC" => {
                let family = match required(&jwk.crv, "crv")? {
                    "P-256" => KeyFamily::EcP256,
                    "P-384" => KeyFamily::EcP384,
                    other => return Err(JwkError::UnsupportedCurve(other.to_string())),
                };
                let x = required(&jwk.x, "x")?;
                let y = required(&jwk.y, "y")?;
                let key = DecodingKey::from_ec_components(x, y)
                    .map_err(|e| JwkError::BadKeyMaterial(e.to_string()))?;
                (family, key)
            }
            "OKP" => {
                match required(&jwk.crv, "crv")? {
                    "Ed25519" => {}
                    other => return Err(JwkError::UnsupportedCurve(other.to_string())),
                }
                let x = required(&jwk.x, "x")?;
                let key = DecodingKey::from_ed_components(x)
                    .map_err(|e| JwkError::BadKeyMaterial(e.to_string()))?;
                (KeyFamily::Ed25519, key)
            }
            "oct" => return Err(JwkError::Symmetric),
            other => return Err(JwkError::UnsupportedKeyType(other.to_string())),
        };

        let algorithm = match jwk.alg.as_deref() {
            None => None,
            Some(name) => {
                let alg = Algorithm::from_str(name)
                    .map_err(|_| JwkError::UnknownAlgorithm(name.to_string()))?;
                if !family.supports(alg) {
                    return Err(JwkError::AlgorithmMismatch(alg));
                }
                Some(alg)
            }
        };

        Ok(Self {
            key_id,
            family,
            algorithm,
            decoding_key,
            fetched_at,
        })
    }

    /// Key identifier.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Key family.
    pub fn family(&self) -> KeyFamily {
        self.family
    }

    /// Algorithm the key is pinned to by its JWK, if any.
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    /// When the key set containing this key was fetched.
    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// Whether this key may verify a token signed with `algorithm`.
    pub fn matches(&self, algorithm: Algorithm) -> bool {
        self.family.supports(algorithm) && self.algorithm.map_or(true, |pinned| pinned == algorithm)
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("family", &self.family)
            .field("algorithm", &self.algorithm)
            .field("fetched_at", &self.fetched_at)
            .finish_non_exhaustive()
    }
}

fn required<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, JwkError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or(JwkError::MissingParameter(name))
}

/// Immutable snapshot of the provider's signing keys.
///
/// Never mutated once published; a successful refresh swaps in a new set
/// with a higher version.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    version: u64,
    refreshed_at: Option<DateTime<Utc>>,
    refreshed_instant: Option<Instant>,
    /// Entries sharing a `kid` keep document order.
    keys: HashMap<String, Vec<SigningKey>>,
}

impl KeySet {
    /// The empty set a key store starts with.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Convert a fetched document into a key set, skipping unusable entries.
    ///
    /// Usable entries sharing a `kid` are all kept; lookups take the first
    /// one that matches the requested algorithm.
    pub fn from_document(
        document: &JwksDocument,
        version: u64,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        let mut keys: HashMap<String, Vec<SigningKey>> =
            HashMap::with_capacity(document.keys.len());

        for entry in &document.keys {
            let parsed = serde_json::from_value::<Jwk>(entry.clone())
                .map_err(|e| JwkError::Invalid(e.to_string()))
                .and_then(|jwk| SigningKey::from_jwk(&jwk, fetched_at));

            match parsed {
                Ok(key) => {
                    let entries = keys.entry(key.key_id().to_string()).or_default();
                    if !entries.is_empty() {
                        tracing::debug!(
                            target: "guard.jwks",
                            kid = %key.key_id(),
                            "Multiple JWKS entries share a kid"
                        );
                    }
                    entries.push(key);
                }
                Err(e) => {
                    let kid = entry.get("kid").and_then(serde_json::Value::as_str);
                    tracing::warn!(
                        target: "guard.jwks",
                        kid = ?kid,
                        error = %e,
                        "Skipping unusable JWKS entry"
                    );
                }
            }
        }

        Self {
            version,
            refreshed_at: Some(fetched_at),
            refreshed_instant: Some(Instant::now()),
            keys,
        }
    }

    /// Monotonic version; 0 means never refreshed.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Wall-clock time of the refresh that produced this set.
    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }

    /// Monotonic time of the refresh that produced this set.
    pub fn refreshed_instant(&self) -> Option<Instant> {
        self.refreshed_instant
    }

    /// All entries published under `key_id`, in document order.
    pub fn get(&self, key_id: &str) -> &[SigningKey] {
        self.keys.get(key_id).map_or(&[], Vec::as_slice)
    }

    /// First key for `key_id` that may verify `algorithm`.
    pub fn find(&self, key_id: &str, algorithm: Algorithm) -> Option<&SigningKey> {
        self.get(key_id).iter().find(|key| key.matches(algorithm))
    }

    /// Sorted key ids.
    pub fn key_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.keys.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Number of usable keys.
    pub fn len(&self) -> usize {
        self.keys.values().map(Vec::len).sum()
    }

    /// Whether the set holds no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    // 32 bytes of base64url; not a real curve point, which is fine for parsing.
    const ED_X: &str = "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo";
    const EC_X: &str = "f83OJ3D2xF1Bg8vub9tLe1gHMzV76e8Tus9uPHvRVEU";
    const EC_Y: &str = "x_FEzRu9m36HLN_tue659LNpXW6pCyStikYjKIWI5a0";
    const RSA_N: &str = "sXchDaQebHnPiGvyDOAT4saGEUetSyo9MKLOoWFsueri23bOdgWp4Dy1WlUzewbgBHod5pcM9H95GQRV3JDXboIRROSBigeC5yjU1hGzHHyXss8UDprecbAYxknTcQkhslANGRUZmdTOQ5qTRsLAt6BTYuyvVRdhS8exSZEy_c4gs_7svlJJQ4H9_NxsiIoLwAEk7-Q3UXERGYw_75IDrGA84-lA_-Ct4eTlXHBIY2EaV7t7LjJaynVJCpkv4LKjTTAumiGUIuQhrNhZLuF_RJLqHpM2kgWFLU7-VTdL1VbC2tejvcI2BlMkEpk1BzBZI0KQB0GaDWFLN-aEAw3vRw";

    fn parse(value: serde_json::Value) -> Result<SigningKey, JwkError> {
        let jwk: Jwk = serde_json::from_value(value).unwrap();
        SigningKey::from_jwk(&jwk, Utc::now())
    }

    #[test]
    fn test_jwk_deserialization() {
        let json = r#"{
            "kty": "OKP",
            "kid": "test-key-01",
            "crv": "Ed25519",
            "x": "dGVzdC1wdWJsaWMta2V5LWRhdGE",
            "alg": "EdDSA",
            "use": "sig"
        }"#;

        let jwk: Jwk = serde_json::from_str(json).unwrap();

        assert_eq!(jwk.kty, "OKP");
        assert_eq!(jwk.kid.as_deref(), Some("test-key-01"));
        assert_eq!(jwk.crv.as_deref(), Some("Ed25519"));
        assert_eq!(jwk.alg.as_deref(), Some("EdDSA"));
        assert_eq!(jwk.key_use.as_deref(), Some("sig"));
        assert!(jwk.n.is_none());
    }

    #[test]
    fn test_family_supports() {
        assert!(KeyFamily::Rsa.supports(Algorithm::RS256));
        assert!(KeyFamily::Rsa.supports(Algorithm::PS512));
        assert!(!KeyFamily::Rsa.supports(Algorithm::ES256));
        assert!(!KeyFamily::Rsa.supports(Algorithm::HS256));
        assert!(KeyFamily::EcP256.supports(Algorithm::ES256));
        assert!(!KeyFamily::EcP256.supports(Algorithm::ES384));
        assert!(KeyFamily::EcP384.supports(Algorithm::ES384));
        assert!(KeyFamily::Ed25519.supports(Algorithm::EdDSA));
        assert!(!KeyFamily::Ed25519.supports(Algorithm::RS256));
    }

    #[test]
    fn test_rsa_key_without_alg_matches_family() {
        let key = parse(json!({"kty": "RSA", "kid": "r1", "n": RSA_N, "e": "AQAB"})).unwrap();
        assert_eq!(key.family(), KeyFamily::Rsa);
        assert_eq!(key.algorithm(), None);
        assert!(key.matches(Algorithm::RS256));
        assert!(key.matches(Algorithm::PS256));
        assert!(!key.matches(Algorithm::ES256));
    }

    #[test]
    fn test_alg_pins_key() {
        let key = parse(json!({
            "kty": "RSA", "kid": "r1", "alg": "RS256", "use": "sig", "n": RSA_N, "e": "AQAB"
        }))
        .unwrap();
        assert!(key.matches(Algorithm::RS256));
        assert!(!key.matches(Algorithm::RS512));
    }

    #[test]
    fn test_ec_and_okp_keys() {
        let key = parse(json!({"kty": "EC", "kid": "e1", "crv": "P-256", "x": EC_X, "y": EC_Y}))
            .unwrap();
        assert_eq!(key.family(), KeyFamily::EcP256);
        assert!(key.matches(Algorithm::ES256));

        let key = parse(json!({"kty": "OKP", "kid": "o1", "crv": "Ed25519", "x": ED_X})).unwrap();
        assert_eq!(key.family(), KeyFamily::Ed25519);
        assert!(key.matches(Algorithm::EdDSA));
    }

    #[test]
    fn test_unusable_keys_rejected() {
        assert_eq!(
            parse(json!({"kty": "oct", "kid": "s", "k": "c2VjcmV0"})).unwrap_err(),
            JwkError::Symmetric
        );
        assert_eq!(
            parse(json!({"kty": "RSA", "n": RSA_N, "e": "AQAB"})).unwrap_err(),
            JwkError::MissingKeyId
        );
        assert_eq!(
            parse(json!({"kty": "RSA", "kid": "r", "use": "enc", "n": RSA_N, "e": "AQAB"}))
                .unwrap_err(),
            JwkError::NotForSigning("enc".to_string())
        );
        assert_eq!(
            parse(json!({"kty": "RSA", "kid": "r", "e": "AQAB"})).unwrap_err(),
            JwkError::MissingParameter("n")
        );
        assert_eq!(
            parse(json!({"kty": "EC", "kid": "e", "crv": "P-521", "x": EC_X, "y": EC_Y}))
                .unwrap_err(),
            JwkError::UnsupportedCurve("P-521".to_string())
        );
        assert_eq!(
            parse(json!({"kty": "OKP", "kid": "o", "crv": "X25519", "x": ED_X})).unwrap_err(),
            JwkError::UnsupportedCurve("X25519".to_string())
        );
        assert_eq!(
            parse(json!({"kty": "PQC", "kid": "p"})).unwrap_err(),
            JwkError::UnsupportedKeyType("PQC".to_string())
        );
        assert_eq!(
            parse(json!({"kty": "RSA", "kid": "r", "alg": "ES256", "n": RSA_N, "e": "AQAB"}))
                .unwrap_err(),
            JwkError::AlgorithmMismatch(Algorithm::ES256)
        );
        assert!(matches!(
            parse(json!({"kty": "RSA", "kid": "r", "alg": "RS999", "n": RSA_N, "e": "AQAB"})),
            Err(JwkError::UnknownAlgorithm(_))
        ));
        assert!(matches!(
            parse(json!({"kty": "OKP", "kid": "o", "crv": "Ed25519", "x": "!!not base64!!"})),
            Err(JwkError::BadKeyMaterial(_))
        ));
    }

    #[test]
    fn test_key_set_skips_bad_entries() {
        let document = JwksDocument {
            keys: vec![
                json!({"kty": "OKP", "kid": "good", "crv": "Ed25519", "x": ED_X}),
                json!({"kty": "oct", "kid": "secret", "k": "c2VjcmV0"}),
                json!("not an object"),
                json!({"kty": "OKP", "kid": "good", "crv": "Ed25519", "x": "AAAA"}),
                json!({"kty": "RSA", "kid": "rsa", "n": RSA_N, "e": "AQAB"}),
            ],
        };

        let set = KeySet::from_document(&document, 3, Utc::now());

        assert_eq!(set.version(), 3);
        assert!(set.refreshed_at().is_some());
        assert_eq!(set.key_ids(), vec!["good", "rsa"]);
        assert!(set.find("good", Algorithm::EdDSA).is_some());
        assert!(set.find("good", Algorithm::RS256).is_none());
        assert!(set.find("missing", Algorithm::EdDSA).is_none());
    }

    #[test]
    fn test_shared_kid_keeps_each_pinned_algorithm() {
        let document = JwksDocument {
            keys: vec![
                json!({"kty": "RSA", "kid": "shared", "alg": "RS256", "n": RSA_N, "e": "AQAB"}),
                json!({"kty": "RSA", "kid": "shared", "alg": "PS256", "n": RSA_N, "e": "AQAB"}),
            ],
        };

        let set = KeySet::from_document(&document, 1, Utc::now());

        assert_eq!(set.len(), 2);
        assert_eq!(set.key_ids(), vec!["shared"]);
        assert_eq!(set.get("shared").len(), 2);
        assert!(set.find("shared", Algorithm::RS256).is_some());
        assert!(set.find("shared", Algorithm::PS256).is_some());
        assert!(set.find("shared", Algorithm::RS384).is_none());
        assert!(set.get("missing").is_empty());
    }

    #[test]
    fn test_empty_key_set() {
        let set = KeySet::empty();
        assert_eq!(set.version(), 0);
        assert!(set.is_empty());
        assert!(set.refreshed_instant().is_none());
    }

    #[test]
    fn test_signing_key_debug_omits_material() {
        let key = parse(json!({"kty": "OKP", "kid": "o1", "crv": "Ed25519", "x": ED_X})).unwrap();
        let debug_str = format!("{key:?}");
        assert!(debug_str.contains("o1"));
        assert!(!debug_str.contains(ED_X));
    }
}
