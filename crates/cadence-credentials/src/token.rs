//! Credential token values.

use chrono::{DateTime, Duration, Utc};
use std::fmt;

/// How the bearer value must be attached to the upstream handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    /// OAuth access token, sent as `Authorization: Bearer`.
    AccessToken,
    /// Pre-shared key, embedded in the endpoint URL.
    ApiKey,
}

/// A credential usable for one upstream handshake.
///
/// Held only long enough to open the connection; never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialToken {
    bearer: String,
    kind: CredentialKind,
    expires_at: Option<DateTime<Utc>>,
    /// Name of the strategy that produced the token.
    source: &'static str,
}

impl CredentialToken {
    pub fn access_token(
        bearer: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
        source: &'static str,
    ) -> Self {
        Self {
            bearer: bearer.into(),
            kind: CredentialKind::AccessToken,
            expires_at,
            source,
        }
    }

    pub fn api_key(key: impl Into<String>, source: &'static str) -> Self {
        Self {
            bearer: key.into(),
            kind: CredentialKind::ApiKey,
            expires_at: None,
            source,
        }
    }

    pub fn bearer(&self) -> &str {
        &self.bearer
    }

    pub fn kind(&self) -> CredentialKind {
        self.kind
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn source(&self) -> &'static str {
        self.source
    }

    /// Returns `true` if the token expires within `buffer` of now.
    ///
    /// Tokens without an expiry never expire.
    pub fn expires_within(&self, buffer: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() + buffer >= expires_at,
            None => false,
        }
    }
}

impl fmt::Debug for CredentialToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialToken")
            .field("bearer", &"[REDACTED]")
            .field("kind", &self.kind)
            .field("expires_at", &self.expires_at)
            .field("source", &self.source)
            .finish()
    }
}
