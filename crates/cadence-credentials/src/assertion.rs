//! Manual signed-assertion exchange (JWT bearer grant, RFC 7523).
//!
//! Used when the ambient identity provider cannot produce a token but a
//! service account key file is available. The relay signs a claim set with
//! the service account's private key and trades it for an access token.

use crate::error::CredentialError;
use crate::strategy::{diagnostic, CredentialStrategy};
use crate::token::CredentialToken;
use async_trait::async_trait;
use cadence_types::RuntimeMode;
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// `grant_type` for the JWT bearer exchange.
pub const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for the assertion.
const ASSERTION_TTL_SECS: i64 = 3600;

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(5);

/// The fields of a service account key file the exchange needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &"[REDACTED]")
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

/// Claim set signed into the assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub scope: String,
}

impl AssertionClaims {
    /// Issuer and subject are the service identity; the audience is the
    /// token endpoint; expiry is one hour from `now`.
    pub fn new(client_email: &str, token_uri: &str, scopes: &[String], now: i64) -> Self {
        Self {
            iss: client_email.to_string(),
            sub: client_email.to_string(),
            aud: token_uri.to_string(),
            iat: now,
            exp: now + ASSERTION_TTL_SECS,
            scope: scopes.join(" "),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TokenEndpointResponse {
    access_token: Option<String>,
    id_token: Option<String>,
    expires_in: Option<i64>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Signs an assertion with a service account key and exchanges it.
#[derive(Debug, Clone)]
pub struct ServiceAccountAssertion {
    key_path: Option<PathBuf>,
    token_uri_override: Option<String>,
    client: reqwest::Client,
    mode: RuntimeMode,
}

impl ServiceAccountAssertion {
    pub const NAME: &'static str = "signed_assertion";

    pub fn new(key_path: Option<PathBuf>, mode: RuntimeMode) -> Self {
        let client = reqwest::Client::builder()
            .timeout(EXCHANGE_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            key_path,
            token_uri_override: None,
            client,
            mode,
        }
    }

    /// Sends the assertion to `token_uri` instead of the key file's endpoint.
    pub fn with_token_uri(mut self, token_uri: impl Into<String>) -> Self {
        self.token_uri_override = Some(token_uri.into());
        self
    }

    async fn load_key(&self) -> Result<ServiceAccountKey, CredentialError> {
        let path = self.key_path.as_ref().ok_or_else(|| {
            CredentialError::Unavailable("no service account key file configured".to_string())
        })?;

        if !self.mode.is_production() {
            tracing::debug!(path = %path.display(), "reading service account key file");
        }

        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            CredentialError::Unavailable(format!(
                "service account key file unreadable ({})",
                diagnostic(self.mode, format!("{}: {}", path.display(), e))
            ))
        })?;

        serde_json::from_str(&contents).map_err(|e| {
            CredentialError::Unavailable(format!(
                "service account key file is malformed ({})",
                diagnostic(self.mode, e.to_string())
            ))
        })
    }

    fn token_uri<'a>(&'a self, key: &'a ServiceAccountKey) -> &'a str {
        self.token_uri_override
            .as_deref()
            .or(key.token_uri.as_deref())
            .unwrap_or(DEFAULT_TOKEN_URI)
    }
}

/// Signs `claims` with the key's RSA private key.
pub fn sign_assertion(
    key: &ServiceAccountKey,
    claims: &AssertionClaims,
) -> Result<String, CredentialError> {
    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| CredentialError::Signing(e.to_string()))?;
    let mut header = Header::new(Algorithm::RS256);
    header.kid = key.private_key_id.clone();
    jsonwebtoken::encode(&header, claims, &encoding_key)
        .map_err(|e| CredentialError::Signing(e.to_string()))
}

/// Accepts only a response carrying an access token.
///
/// An identity token on its own is a failure: it cannot authorize calls to
/// the upstream API.
fn interpret_token_response(
    response: TokenEndpointResponse,
    mode: RuntimeMode,
) -> Result<CredentialToken, CredentialError> {
    if let Some(access_token) = response.access_token.filter(|t| !t.is_empty()) {
        let expires_at = response
            .expires_in
            .map(|secs| Utc::now() + ChronoDuration::seconds(secs));
        return Ok(CredentialToken::access_token(
            access_token,
            expires_at,
            ServiceAccountAssertion::NAME,
        ));
    }

    if response.id_token.is_some() {
        return Err(CredentialError::Rejected(
            "token endpoint returned an identity token without an access token".to_string(),
        ));
    }

    let detail = match (response.error, response.error_description) {
        (Some(error), Some(description)) => format!("{error}: {description}"),
        (Some(error), None) => error,
        (None, Some(description)) => description,
        (None, None) => "empty response".to_string(),
    };
    Err(CredentialError::Rejected(format!(
        "no access token in response ({})",
        diagnostic(mode, detail)
    )))
}

#[async_trait]
impl CredentialStrategy for ServiceAccountAssertion {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn acquire(&self, scopes: &[String]) -> Result<CredentialToken, CredentialError> {
        let key = self.load_key().await?;
        let token_uri = self.token_uri(&key);
        let claims = AssertionClaims::new(&key.client_email, token_uri, scopes, Utc::now().timestamp());
        let assertion = sign_assertion(&key, &claims)?;

        let response = self
            .client
            .post(token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| {
                CredentialError::Unavailable(format!(
                    "token endpoint unreachable ({})",
                    diagnostic(self.mode, e.to_string())
                ))
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !self.mode.is_production() {
            tracing::debug!(%status, body = %body, "token endpoint response");
        }

        let parsed: TokenEndpointResponse = serde_json::from_str(&body).unwrap_or_default();
        if !status.is_success() && parsed.access_token.is_none() {
            let detail = parsed
                .error_description
                .or(parsed.error)
                .unwrap_or_else(|| status.to_string());
            return Err(CredentialError::Rejected(format!(
                "token endpoint returned {status} ({})",
                diagnostic(self.mode, detail)
            )));
        }

        interpret_token_response(parsed, self.mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Form, Json, Router};
    use jsonwebtoken::{DecodingKey, Validation};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use tokio::net::TcpListener;

    fn fixture(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(name)
    }

    async fn spawn_token_endpoint(reply: Value) -> String {
        let router = Router::new().route(
            "/token",
            post(move |Form(form): Form<HashMap<String, String>>| {
                let reply = reply.clone();
                async move {
                    assert_eq!(form.get("grant_type").map(String::as_str), Some(JWT_BEARER_GRANT));
                    let assertion = form.get("assertion").expect("assertion field");
                    let public_pem =
                        std::fs::read(fixture("test_service_account.pub.pem")).unwrap();
                    let mut validation = Validation::new(Algorithm::RS256);
                    validation.validate_aud = false;
                    let decoded = jsonwebtoken::decode::<AssertionClaims>(
                        assertion,
                        &DecodingKey::from_rsa_pem(&public_pem).unwrap(),
                        &validation,
                    )
                    .expect("assertion must verify against the service account key");
                    assert!(decoded.claims.aud.ends_with("/token"));
                    assert_eq!(decoded.claims.exp - decoded.claims.iat, 3600);
                    assert_eq!(decoded.claims.iss, decoded.claims.sub);
                    assert_eq!(decoded.header.kid.as_deref(), Some("test-key-1"));
                    Json(reply)
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/token", addr)
    }

    #[test]
    fn claims_cover_identity_audience_and_scope() {
        let scopes = vec![
            "https://www.googleapis.com/auth/cloud-platform".to_string(),
            "https://www.googleapis.com/auth/generative-language".to_string(),
        ];
        let claims = AssertionClaims::new("svc@example.iam", "https://token", &scopes, 1_000);
        assert_eq!(claims.iss, "svc@example.iam");
        assert_eq!(claims.sub, "svc@example.iam");
        assert_eq!(claims.aud, "https://token");
        assert_eq!(claims.exp, 4_600);
        assert_eq!(
            claims.scope,
            "https://www.googleapis.com/auth/cloud-platform https://www.googleapis.com/auth/generative-language"
        );
    }

    #[test]
    fn identity_token_alone_is_an_error() {
        let response = TokenEndpointResponse {
            id_token: Some("eyJ...".to_string()),
            ..Default::default()
        };
        let err = interpret_token_response(response, RuntimeMode::Development).unwrap_err();
        assert!(matches!(err, CredentialError::Rejected(_)));
        assert!(err.to_string().contains("identity token"));
    }

    #[test]
    fn error_body_is_withheld_in_production() {
        let response = TokenEndpointResponse {
            error: Some("invalid_grant".to_string()),
            error_description: Some("account disabled for user x@y".to_string()),
            ..Default::default()
        };
        let err = interpret_token_response(response, RuntimeMode::Production).unwrap_err();
        assert!(!err.to_string().contains("x@y"));
    }

    #[tokio::test]
    async fn missing_key_path_is_unavailable() {
        let strategy = ServiceAccountAssertion::new(None, RuntimeMode::Development);
        assert!(matches!(
            strategy.acquire(&[]).await,
            Err(CredentialError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn unreadable_key_path_hides_path_in_production() {
        let strategy = ServiceAccountAssertion::new(
            Some(PathBuf::from("/nonexistent/secret-dir/key.json")),
            RuntimeMode::Production,
        );
        let err = strategy.acquire(&[]).await.unwrap_err();
        assert!(!err.to_string().contains("secret-dir"));
    }

    #[tokio::test]
    async fn exchanges_signed_assertion_for_access_token() {
        let token_uri =
            spawn_token_endpoint(json!({"access_token": "ya29.exchanged", "expires_in": 3600})).await;
        let strategy = ServiceAccountAssertion::new(
            Some(fixture("test_service_account.json")),
            RuntimeMode::Development,
        )
        .with_token_uri(token_uri);

        let token = strategy
            .acquire(&["https://www.googleapis.com/auth/cloud-platform".to_string()])
            .await
            .unwrap();
        assert_eq!(token.bearer(), "ya29.exchanged");
        assert_eq!(token.source(), ServiceAccountAssertion::NAME);
    }

    #[tokio::test]
    async fn exchange_returning_only_id_token_fails() {
        let token_uri = spawn_token_endpoint(json!({"id_token": "eyJhbGciOi..."})).await;
        let strategy = ServiceAccountAssertion::new(
            Some(fixture("test_service_account.json")),
            RuntimeMode::Development,
        )
        .with_token_uri(token_uri);

        let err = strategy.acquire(&[]).await.unwrap_err();
        assert!(matches!(err, CredentialError::Rejected(_)));
    }
}
