//! Validator configuration.
//!
//! Configuration is loaded from `GUARD_*` environment variables or built in
//! code with [`ValidatorConfig::new`] and the `with_*` setters. Either way,
//! [`ValidatorConfig::validate`] is applied before the validator is built.

use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use jsonwebtoken::Algorithm;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default scheduled JWKS refresh interval (5 minutes).
pub const DEFAULT_KEY_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// Default JWKS / discovery fetch timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default minimum time between cache-miss refreshes.
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Default claim holding the identity's roles.
pub const DEFAULT_ROLE_CLAIM: &str = "roles";

/// Default signature algorithm allow-list.
pub const DEFAULT_ALLOWED_ALGORITHMS: [Algorithm; 2] = [Algorithm::RS256, Algorithm::ES256];

/// Token validation configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatorConfig {
    /// Exact expected `iss` value.
    pub expected_issuer: String,

    /// Audience this service accepts tokens for.
    pub expected_audience: String,

    /// Signature algorithms accepted in token headers.
    pub allowed_algorithms: Vec<Algorithm>,

    /// JWKS endpoint. When `None`, discovered from the issuer's OpenID
    /// configuration document.
    pub jwks_url: Option<String>,

    /// Tolerance applied to `exp`, `nbf` and `iat` checks.
    pub clock_skew: Duration,

    /// Interval of the scheduled background JWKS refresh.
    pub key_refresh_interval: Duration,

    /// Upper bound on a single JWKS or discovery fetch.
    pub fetch_timeout: Duration,

    /// A cache miss does not refresh keys fetched less than this long ago.
    /// Zero disables the cooldown.
    pub min_refresh_interval: Duration,

    /// Claim paths (dotted for nested objects) whose values form the role set.
    pub role_claims: Vec<String>,

    /// Compare audiences case-sensitively.
    pub audience_case_sensitive: bool,

    /// Accept tokens whose `aud` lists more than one audience.
    pub allow_multiple_audiences: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid issuer or audience configuration: {0}")]
    InvalidIdentity(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid algorithm configuration: {0}")]
    InvalidAlgorithm(String),

    #[error("Invalid duration configuration: {0}")]
    InvalidDuration(String),

    #[error("Invalid JWKS URL configuration: {0}")]
    InvalidJwksUrl(String),

    #[error("Invalid role claim configuration: {0}")]
    InvalidRoleClaims(String),

    #[error("Invalid boolean configuration: {0}")]
    InvalidBool(String),

    #[error("OpenID Connect discovery failed: {0}")]
    Discovery(String),
}

impl ValidatorConfig {
    /// Configuration with defaults for everything except issuer and audience.
    pub fn new(expected_issuer: impl Into<String>, expected_audience: impl Into<String>) -> Self {
        Self {
            expected_issuer: expected_issuer.into(),
            expected_audience: expected_audience.into(),
            allowed_algorithms: DEFAULT_ALLOWED_ALGORITHMS.to_vec(),
            jwks_url: None,
            clock_skew: DEFAULT_CLOCK_SKEW,
            key_refresh_interval: DEFAULT_KEY_REFRESH_INTERVAL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
            role_claims: vec![DEFAULT_ROLE_CLAIM.to_string()],
            audience_case_sensitive: true,
            allow_multiple_audiences: true,
        }
    }

    /// Set the JWKS URL explicitly (skips discovery).
    #[must_use]
    pub fn with_jwks_url(mut self, jwks_url: impl Into<String>) -> Self {
        self.jwks_url = Some(jwks_url.into());
        self
    }

    /// Replace the algorithm allow-list.
    #[must_use]
    pub fn with_allowed_algorithms(
        mut self,
        algorithms: impl IntoIterator<Item = Algorithm>,
    ) -> Self {
        self.allowed_algorithms = algorithms.into_iter().collect();
        self
    }

    /// Set the clock skew tolerance.
    #[must_use]
    pub fn with_clock_skew(mut self, clock_skew: Duration) -> Self {
        self.clock_skew = clock_skew;
        self
    }

    /// Set the scheduled refresh interval.
    #[must_use]
    pub fn with_key_refresh_interval(mut self, interval: Duration) -> Self {
        self.key_refresh_interval = interval;
        self
    }

    /// Set the fetch timeout.
    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Set the cache-miss refresh cooldown.
    #[must_use]
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Replace the role claim paths.
    #[must_use]
    pub fn with_role_claims<S: Into<String>>(
        mut self,
        claims: impl IntoIterator<Item = S>,
    ) -> Self {
        self.role_claims = claims.into_iter().map(Into::into).collect();
        self
    }

    /// Choose case-sensitive or case-insensitive audience comparison.
    #[must_use]
    pub fn with_audience_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.audience_case_sensitive = case_sensitive;
        self
    }

    /// Accept or reject tokens carrying several audiences.
    #[must_use]
    pub fn with_allow_multiple_audiences(mut self, allow: bool) -> Self {
        self.allow_multiple_audiences = allow;
        self
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let expected_issuer = vars
            .get("GUARD_EXPECTED_ISSUER")
            .ok_or_else(|| ConfigError::MissingEnvVar("GUARD_EXPECTED_ISSUER".to_string()))?
            .clone();

        let expected_audience = vars
            .get("GUARD_EXPECTED_AUDIENCE")
            .ok_or_else(|| ConfigError::MissingEnvVar("GUARD_EXPECTED_AUDIENCE".to_string()))?
            .clone();

        let mut config = Self::new(expected_issuer, expected_audience);

        config.jwks_url = vars
            .get("GUARD_JWKS_URL")
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());

        if let Some(value_str) = vars.get("GUARD_ALLOWED_ALGORITHMS") {
            config.allowed_algorithms = value_str
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(|name| {
                    Algorithm::from_str(name).map_err(|_| {
                        ConfigError::InvalidAlgorithm(format!(
                            "GUARD_ALLOWED_ALGORITHMS contains unknown algorithm '{}'",
                            name
                        ))
                    })
                })
                .collect::<Result<_, _>>()?;
        }

        if let Some(value_str) = vars.get("GUARD_CLOCK_SKEW_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "GUARD_CLOCK_SKEW_SECONDS must be a non-negative integer, got '{}': {}",
                    value_str, e
                ))
            })?;
            config.clock_skew = Duration::from_secs(value);
        }

        if let Some(value) = parse_seconds(vars, "GUARD_KEY_REFRESH_INTERVAL_SECONDS")? {
            config.key_refresh_interval = value;
        }

        if let Some(value) = parse_seconds(vars, "GUARD_FETCH_TIMEOUT_SECONDS")? {
            config.fetch_timeout = value;
        }

        if let Some(value) = parse_seconds(vars, "GUARD_MIN_REFRESH_INTERVAL_SECONDS")? {
            config.min_refresh_interval = value;
        }

        if let Some(value_str) = vars.get("GUARD_ROLE_CLAIMS") {
            config.role_claims = value_str
                .split(',')
                .map(str::trim)
                .filter(|claim| !claim.is_empty())
                .map(ToString::to_string)
                .collect();
        }

        if let Some(value) = parse_bool(vars, "GUARD_AUDIENCE_CASE_SENSITIVE")? {
            config.audience_case_sensitive = value;
        }

        if let Some(value) = parse_bool(vars, "GUARD_ALLOW_MULTIPLE_AUDIENCES")? {
            config.allow_multiple_audiences = value;
        }

        config.validate()?;

        tracing::debug!(target: "guard.config", config = ?config, "Loaded validator configuration");

        Ok(config)
    }

    /// Check invariants that every constructed validator relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.expected_issuer.trim().is_empty() {
            return Err(ConfigError::InvalidIdentity(
                "expected issuer must not be empty".to_string(),
            ));
        }

        if self.expected_audience.trim().is_empty() {
            return Err(ConfigError::InvalidIdentity(
                "expected audience must not be empty".to_string(),
            ));
        }

        if self.clock_skew > MAX_CLOCK_SKEW {
            return Err(ConfigError::InvalidJwtClockSkew(format!(
                "clock skew must not exceed {} seconds, got {}",
                MAX_CLOCK_SKEW.as_secs(),
                self.clock_skew.as_secs()
            )));
        }

        if self.allowed_algorithms.is_empty() {
            return Err(ConfigError::InvalidAlgorithm(
                "at least one algorithm must be allowed".to_string(),
            ));
        }

        if let Some(symmetric) = self
            .allowed_algorithms
            .iter()
            .find(|alg| is_symmetric(**alg))
        {
            return Err(ConfigError::InvalidAlgorithm(format!(
                "symmetric algorithm {:?} cannot be verified with published keys",
                symmetric
            )));
        }

        if self.key_refresh_interval.is_zero() {
            return Err(ConfigError::InvalidDuration(
                "key refresh interval must be greater than 0".to_string(),
            ));
        }

        if self.fetch_timeout.is_zero() {
            return Err(ConfigError::InvalidDuration(
                "fetch timeout must be greater than 0".to_string(),
            ));
        }

        if self.role_claims.iter().any(|claim| claim.trim().is_empty()) {
            return Err(ConfigError::InvalidRoleClaims(
                "role claim names must not be empty".to_string(),
            ));
        }

        if let Some(url) = &self.jwks_url {
            if !is_secure_url(url) {
                return Err(ConfigError::InvalidJwksUrl(format!(
                    "JWKS URL must use HTTPS (HTTP only allowed for localhost), got '{}'",
                    url
                )));
            }
        }

        Ok(())
    }
}

fn parse_seconds(
    vars: &HashMap<String, String>,
    name: &str,
) -> Result<Option<Duration>, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(None);
    };
    let value: u64 = value_str.parse().map_err(|e| {
        ConfigError::InvalidDuration(format!(
            "{} must be a non-negative integer, got '{}': {}",
            name, value_str, e
        ))
    })?;
    Ok(Some(Duration::from_secs(value)))
}

fn parse_bool(vars: &HashMap<String, String>, name: &str) -> Result<Option<bool>, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(None);
    };
    match value_str.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(Some(true)),
        "false" | "0" | "no" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidBool(format!(
            "{} must be true or false, got '{}'",
            name, value_str
        ))),
    }
}

/// HMAC algorithms need a shared secret and never appear in a JWKS.
pub(crate) fn is_symmetric(algorithm: Algorithm) -> bool {
    matches!(
        algorithm,
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
    )
}

/// HTTPS, or plain HTTP to a loopback host.
pub(crate) fn is_secure_url(url: &str) -> bool {
    if url.starts_with("https://") {
        return true;
    }
    let Some(rest) = url.strip_prefix("http://") else {
        return false;
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = if authority.starts_with('[') {
        authority
            .split_once(']')
            .map(|(host, _)| format!("{host}]"))
            .unwrap_or_default()
    } else {
        authority
            .split(':')
            .next()
            .unwrap_or_default()
            .to_string()
    };
    matches!(host.as_str(), "localhost" | "127.0.0.1" | "[::1]")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            (
                "GUARD_EXPECTED_ISSUER".to_string(),
                "https://issuer.example".to_string(),
            ),
            (
                "GUARD_EXPECTED_AUDIENCE".to_string(),
                "api://test".to_string(),
            ),
        ])
    }

    #[test]
    fn test_from_vars_defaults() {
        let config = ValidatorConfig::from_vars(&base_vars()).unwrap();

        assert_eq!(config.expected_issuer, "https://issuer.example");
        assert_eq!(config.expected_audience, "api://test");
        assert_eq!(
            config.allowed_algorithms,
            vec![Algorithm::RS256, Algorithm::ES256]
        );
        assert_eq!(config.jwks_url, None);
        assert_eq!(config.clock_skew, DEFAULT_CLOCK_SKEW);
        assert_eq!(config.key_refresh_interval, DEFAULT_KEY_REFRESH_INTERVAL);
        assert_eq!(config.fetch_timeout, DEFAULT_FETCH_TIMEOUT);
        assert_eq!(config.min_refresh_interval, DEFAULT_MIN_REFRESH_INTERVAL);
        assert_eq!(config.role_claims, vec!["roles".to_string()]);
        assert!(config.audience_case_sensitive);
        assert!(config.allow_multiple_audiences);
    }

    #[test]
    fn test_from_vars_missing_required() {
        let mut vars = base_vars();
        vars.remove("GUARD_EXPECTED_ISSUER");
        assert_eq!(
            ValidatorConfig::from_vars(&vars),
            Err(ConfigError::MissingEnvVar(
                "GUARD_EXPECTED_ISSUER".to_string()
            ))
        );

        let mut vars = base_vars();
        vars.remove("GUARD_EXPECTED_AUDIENCE");
        assert!(matches!(
            ValidatorConfig::from_vars(&vars),
            Err(ConfigError::MissingEnvVar(_))
        ));
    }

    #[test]
    fn test_from_vars_all_overrides() {
        let mut vars = base_vars();
        vars.extend([
            (
                "GUARD_JWKS_URL".to_string(),
                "https://issuer.example/keys".to_string(),
            ),
            (
                "GUARD_ALLOWED_ALGORITHMS".to_string(),
                "RS256, PS256,EdDSA".to_string(),
            ),
            ("GUARD_CLOCK_SKEW_SECONDS".to_string(), "30".to_string()),
            (
                "GUARD_KEY_REFRESH_INTERVAL_SECONDS".to_string(),
                "120".to_string(),
            ),
            ("GUARD_FETCH_TIMEOUT_SECONDS".to_string(), "3".to_string()),
            (
                "GUARD_MIN_REFRESH_INTERVAL_SECONDS".to_string(),
                "0".to_string(),
            ),
            (
                "GUARD_ROLE_CLAIMS".to_string(),
                "roles, realm_access.roles".to_string(),
            ),
            (
                "GUARD_AUDIENCE_CASE_SENSITIVE".to_string(),
                "false".to_string(),
            ),
            (
                "GUARD_ALLOW_MULTIPLE_AUDIENCES".to_string(),
                "no".to_string(),
            ),
        ]);

        let config = ValidatorConfig::from_vars(&vars).unwrap();
        assert_eq!(
            config.jwks_url.as_deref(),
            Some("https://issuer.example/keys")
        );
        assert_eq!(
            config.allowed_algorithms,
            vec![Algorithm::RS256, Algorithm::PS256, Algorithm::EdDSA]
        );
        assert_eq!(config.clock_skew, Duration::from_secs(30));
        assert_eq!(config.key_refresh_interval, Duration::from_secs(120));
        assert_eq!(config.fetch_timeout, Duration::from_secs(3));
        assert_eq!(config.min_refresh_interval, Duration::ZERO);
        assert_eq!(
            config.role_claims,
            vec!["roles".to_string(), "realm_access.roles".to_string()]
        );
        assert!(!config.audience_case_sensitive);
        assert!(!config.allow_multiple_audiences);
    }

    #[test]
    fn test_rejects_none_and_unknown_algorithms() {
        let mut vars = base_vars();
        vars.insert("GUARD_ALLOWED_ALGORITHMS".to_string(), "RS256,none".to_string());
        assert!(matches!(
            ValidatorConfig::from_vars(&vars),
            Err(ConfigError::InvalidAlgorithm(_))
        ));

        vars.insert("GUARD_ALLOWED_ALGORITHMS".to_string(), "RS999".to_string());
        assert!(matches!(
            ValidatorConfig::from_vars(&vars),
            Err(ConfigError::InvalidAlgorithm(_))
        ));
    }

    #[test]
    fn test_rejects_symmetric_algorithms() {
        let mut vars = base_vars();
        vars.insert("GUARD_ALLOWED_ALGORITHMS".to_string(), "HS256".to_string());
        let err = ValidatorConfig::from_vars(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAlgorithm(msg) if msg.contains("symmetric")));
    }

    #[test]
    fn test_rejects_empty_algorithm_list() {
        let config = ValidatorConfig::new("https://i", "a").with_allowed_algorithms([]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidAlgorithm(_))
        ));
    }

    #[test]
    fn test_clock_skew_bounds() {
        let mut vars = base_vars();
        vars.insert("GUARD_CLOCK_SKEW_SECONDS".to_string(), "601".to_string());
        assert!(matches!(
            ValidatorConfig::from_vars(&vars),
            Err(ConfigError::InvalidJwtClockSkew(_))
        ));

        vars.insert("GUARD_CLOCK_SKEW_SECONDS".to_string(), "600".to_string());
        assert!(ValidatorConfig::from_vars(&vars).is_ok());

        vars.insert("GUARD_CLOCK_SKEW_SECONDS".to_string(), "0".to_string());
        assert_eq!(
            ValidatorConfig::from_vars(&vars).unwrap().clock_skew,
            Duration::ZERO
        );

        vars.insert("GUARD_CLOCK_SKEW_SECONDS".to_string(), "-5".to_string());
        assert!(matches!(
            ValidatorConfig::from_vars(&vars),
            Err(ConfigError::InvalidJwtClockSkew(_))
        ));
    }

    #[test]
    fn test_zero_durations_rejected() {
        let mut vars = base_vars();
        vars.insert(
            "GUARD_KEY_REFRESH_INTERVAL_SECONDS".to_string(),
            "0".to_string(),
        );
        assert!(matches!(
            ValidatorConfig::from_vars(&vars),
            Err(ConfigError::InvalidDuration(_))
        ));

        let mut vars = base_vars();
        vars.insert("GUARD_FETCH_TIMEOUT_SECONDS".to_string(), "0".to_string());
        assert!(matches!(
            ValidatorConfig::from_vars(&vars),
            Err(ConfigError::InvalidDuration(_))
        ));

        let mut vars = base_vars();
        vars.insert("GUARD_FETCH_TIMEOUT_SECONDS".to_string(), "soon".to_string());
        assert!(matches!(
            ValidatorConfig::from_vars(&vars),
            Err(ConfigError::InvalidDuration(_))
        ));
    }

    #[test]
    fn test_invalid_bool() {
        let mut vars = base_vars();
        vars.insert(
            "GUARD_AUDIENCE_CASE_SENSITIVE".to_string(),
            "maybe".to_string(),
        );
        assert!(matches!(
            ValidatorConfig::from_vars(&vars),
            Err(ConfigError::InvalidBool(_))
        ));
    }

    #[test]
    fn test_jwks_url_must_be_secure() {
        let mut vars = base_vars();
        vars.insert(
            "GUARD_JWKS_URL".to_string(),
            "http://issuer.example/keys".to_string(),
        );
        assert!(matches!(
            ValidatorConfig::from_vars(&vars),
            Err(ConfigError::InvalidJwksUrl(_))
        ));

        vars.insert(
            "GUARD_JWKS_URL".to_string(),
            "http://127.0.0.1:8080/keys".to_string(),
        );
        assert!(ValidatorConfig::from_vars(&vars).is_ok());
    }

    #[test]
    fn test_empty_issuer_rejected() {
        let config = ValidatorConfig::new("  ", "api://test");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidIdentity(_))
        ));
    }

    #[test]
    fn test_is_secure_url() {
        assert!(is_secure_url("https://issuer.example/keys"));
        assert!(is_secure_url("http://localhost/keys"));
        assert!(is_secure_url("http://localhost:8082/.well-known/jwks.json"));
        assert!(is_secure_url("http://127.0.0.1:43123"));
        assert!(is_secure_url("http://[::1]:8080/keys"));

        assert!(!is_secure_url("http://issuer.example/keys"));
        assert!(!is_secure_url("http://localhost.evil.example/keys"));
        assert!(!is_secure_url("http://127.0.0.1.evil.example/keys"));
        assert!(!is_secure_url("ftp://localhost/keys"));
        assert!(!is_secure_url("issuer.example"));
    }

    #[test]
    fn test_builder_setters() {
        let config = ValidatorConfig::new("https://i", "a")
            .with_jwks_url("https://i/keys")
            .with_allowed_algorithms([Algorithm::EdDSA])
            .with_clock_skew(Duration::from_secs(5))
            .with_key_refresh_interval(Duration::from_secs(60))
            .with_fetch_timeout(Duration::from_secs(2))
            .with_min_refresh_interval(Duration::ZERO)
            .with_role_claims(["scp"])
            .with_audience_case_sensitive(false)
            .with_allow_multiple_audiences(false);

        assert!(config.validate().is_ok());
        assert_eq!(config.allowed_algorithms, vec![Algorithm::EdDSA]);
        assert_eq!(config.role_claims, vec!["scp".to_string()]);
        assert!(!config.allow_multiple_audiences);
    }
}
