//! Error types for the upstream side of a relay session.

use cadence_credentials::CredentialError;
use tokio_tungstenite::tungstenite;

/// A socket-level failure on an established connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("websocket error: {0}")]
    Socket(String),
}

impl From<tungstenite::Error> for TransportError {
    fn from(e: tungstenite::Error) -> Self {
        match e {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => Self::Closed,
            other => Self::Socket(other.to_string()),
        }
    }
}

/// Errors raised while bringing an upstream session to the open state.
///
/// Every variant is eligible for failover while the session is still
/// connecting.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// No credential could be obtained for the provider.
    #[error("credential acquisition failed: {0}")]
    Credential(#[from] CredentialError),

    /// The socket handshake or setup exchange failed.
    #[error("upstream handshake failed: {0}")]
    Handshake(String),

    /// The endpoint answered the upgrade with a plain HTTP response.
    #[error("upstream answered the upgrade with HTTP {status}")]
    UnexpectedResponse { status: u16 },

    #[error("upstream transport error: {0}")]
    Transport(#[from] TransportError),

    /// Credential acquisition or connect exceeded its budget.
    #[error("upstream did not become ready within {0} ms")]
    Timeout(u64),
}

impl UpstreamError {
    /// Stable error code sent to the client in the error frame.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Credential(_) => "credential_unavailable",
            Self::Handshake(_) | Self::UnexpectedResponse { .. } => "upstream_handshake_failed",
            Self::Transport(_) => "upstream_transport_failed",
            Self::Timeout(_) => "upstream_timeout",
        }
    }
}
