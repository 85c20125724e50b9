//! Mock OpenID provider
//!
//! Serves a JWKS document at `/.well-known/jwks.json` and, on request, a
//! discovery document at `/.well-known/openid-configuration` whose issuer is
//! the mock server's own URI.

use crate::crypto_fixtures::{jwks_document, TestSigningKey};
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const JWKS_PATH: &str = "/.well-known/jwks.json";
pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

/// Mock identity provider backed by a wiremock server.
///
/// Expectations set through `expect_fetches` are verified when the provider
/// is dropped.
pub struct MockJwksProvider {
    server: MockServer,
}

impl MockJwksProvider {
    /// Start a provider with nothing mounted.
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Issuer identifier; the server's base URI.
    pub fn issuer(&self) -> String {
        self.server.uri()
    }

    pub fn jwks_url(&self) -> String {
        format!("{}{}", self.server.uri(), JWKS_PATH)
    }

    /// Serve `keys` as the JWKS document.
    pub async fn serve_keys(&self, keys: &[&TestSigningKey]) {
        self.serve_document(jwks_document(keys), None, None).await;
    }

    /// Serve `keys` and expect exactly `fetches` JWKS requests.
    pub async fn serve_keys_expecting(&self, keys: &[&TestSigningKey], fetches: u64) {
        self.serve_document(jwks_document(keys), None, Some(fetches))
            .await;
    }

    /// Serve `keys` after `delay`, expecting exactly `fetches` requests.
    pub async fn serve_keys_delayed(
        &self,
        keys: &[&TestSigningKey],
        delay: Duration,
        fetches: u64,
    ) {
        self.serve_document(jwks_document(keys), Some(delay), Some(fetches))
            .await;
    }

    /// Serve an arbitrary JWKS body.
    pub async fn serve_document(
        &self,
        document: Value,
        delay: Option<Duration>,
        fetches: Option<u64>,
    ) {
        let mut response = ResponseTemplate::new(200).set_body_json(document);
        if let Some(delay) = delay {
            response = response.set_delay(delay);
        }

        let mock = Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(response);
        let mock = match fetches {
            Some(n) => mock.expect(n),
            None => mock,
        };
        mock.mount(&self.server).await;
    }

    /// Respond to JWKS requests with `status`.
    pub async fn fail_with_status(&self, status: u16) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Serve a discovery document pointing at this provider's JWKS URL.
    pub async fn serve_discovery(&self) {
        Mock::given(method("GET"))
            .and(path(DISCOVERY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": self.issuer(),
                "jwks_uri": self.jwks_url(),
                "id_token_signing_alg_values_supported": ["RS256", "ES256", "EdDSA"],
            })))
            .mount(&self.server)
            .await;
    }

    /// Remove all mounted responses (e.g. before rotating keys).
    pub async fn reset(&self) {
        self.server.reset().await;
    }

    /// Number of JWKS requests received so far.
    pub async fn jwks_fetches(&self) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == JWKS_PATH)
            .count()
    }
}
