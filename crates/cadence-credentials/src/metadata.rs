//! Delegated identity from the hosting environment's metadata server.
//!
//! On managed compute the platform exposes a token endpoint bound to the
//! workload's service identity. No secret material lives in the relay.

use crate::error::CredentialError;
use crate::strategy::{diagnostic, CredentialStrategy};
use crate::token::CredentialToken;
use async_trait::async_trait;
use cadence_types::RuntimeMode;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::time::Duration;

/// Default metadata host; overridable through `GCE_METADATA_HOST`.
pub const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";

const TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";

/// The metadata server answers locally; anything slower means it is absent.
const METADATA_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct MetadataTokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
}

/// Requests an access token from the ambient identity provider.
#[derive(Debug, Clone)]
pub struct MetadataServerIdentity {
    client: reqwest::Client,
    base_url: String,
    mode: RuntimeMode,
}

impl MetadataServerIdentity {
    pub const NAME: &'static str = "delegated_identity";

    /// Creates the strategy for `host`, which may include a scheme.
    pub fn new(host: &str, mode: RuntimeMode) -> Self {
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", host.trim_end_matches('/'))
        };
        let client = reqwest::Client::builder()
            .timeout(METADATA_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url,
            mode,
        }
    }

    fn token_url(&self, scopes: &[String]) -> Result<url::Url, CredentialError> {
        let mut url = url::Url::parse(&format!("{}{}", self.base_url, TOKEN_PATH))
            .map_err(|e| CredentialError::Unavailable(format!("invalid metadata host: {e}")))?;
        if !scopes.is_empty() {
            url.query_pairs_mut().append_pair("scopes", &scopes.join(","));
        }
        Ok(url)
    }
}

#[async_trait]
impl CredentialStrategy for MetadataServerIdentity {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn acquire(&self, scopes: &[String]) -> Result<CredentialToken, CredentialError> {
        let url = self.token_url(scopes)?;

        let response = self
            .client
            .get(url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| {
                CredentialError::Unavailable(format!(
                    "metadata server unreachable ({})",
                    diagnostic(self.mode, e.to_string())
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if !self.mode.is_production() {
                tracing::debug!(%status, body = %body, "metadata token request refused");
            }
            return Err(CredentialError::Unavailable(format!(
                "metadata server returned {status}"
            )));
        }

        let parsed: MetadataTokenResponse = response.json().await.map_err(|e| {
            CredentialError::Unavailable(format!(
                "unreadable metadata token response ({})",
                diagnostic(self.mode, e.to_string())
            ))
        })?;

        let access_token = parsed
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                CredentialError::Unavailable("metadata response had no access token".to_string())
            })?;
        let expires_at = parsed
            .expires_in
            .map(|secs| Utc::now() + ChronoDuration::seconds(secs));

        Ok(CredentialToken::access_token(
            access_token,
            expires_at,
            Self::NAME,
        ))
    }
}
