//! Opening the upstream socket.

use crate::error::UpstreamError;
use crate::frame::{split_tungstenite, FrameSink, FrameStream};
use async_trait::async_trait;
use cadence_credentials::{CredentialKind, CredentialToken};
use cadence_types::{Provider, ProviderKind};
use std::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::{self, handshake::client::Request};

/// Default Gemini Live endpoint.
pub const DEFAULT_PRIMARY_ENDPOINT: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default OpenAI Realtime endpoint. The model is selected by the `model`
/// query parameter, see [`WsConnector::with_secondary_model`].
pub const DEFAULT_SECONDARY_ENDPOINT: &str = "wss://api.openai.com/v1/realtime";

/// An open upstream connection.
pub struct UpstreamLink {
    pub kind: ProviderKind,
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl std::fmt::Debug for UpstreamLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamLink").field("kind", &self.kind).finish_non_exhaustive()
    }
}

/// Opens upstream connections; the seam tests replace with mock servers.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    async fn connect(
        &self,
        provider: Provider,
        credential: &CredentialToken,
    ) -> Result<UpstreamLink, UpstreamError>;
}

/// Which kind of session a credential produces for `provider`.
pub fn provider_kind(provider: Provider, credential: &CredentialToken) -> ProviderKind {
    match (provider, credential.kind()) {
        (Provider::Primary, CredentialKind::AccessToken) => ProviderKind::PrimaryOAuth,
        (Provider::Primary, CredentialKind::ApiKey) => ProviderKind::PrimaryKey,
        (Provider::Secondary, _) => ProviderKind::Secondary,
    }
}

/// Connects with tokio-tungstenite to the configured provider endpoints.
#[derive(Debug, Clone)]
pub struct WsConnector {
    primary_endpoint: String,
    secondary_endpoint: String,
    secondary_model: Option<String>,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(
        primary_endpoint: impl Into<String>,
        secondary_endpoint: impl Into<String>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            primary_endpoint: primary_endpoint.into(),
            secondary_endpoint: secondary_endpoint.into(),
            secondary_model: None,
            connect_timeout,
        }
    }

    /// Names the secondary model in the handshake URL unless the configured
    /// endpoint already carries a `model` parameter.
    pub fn with_secondary_model(mut self, model: impl Into<String>) -> Self {
        self.secondary_model = Some(model.into());
        self
    }

    /// Builds the handshake request with the credential attached.
    ///
    /// Access tokens go in an `Authorization: Bearer` header. Keys go in the
    /// URL: `key` for the primary provider, `api-key` for the secondary.
    pub fn handshake_request(
        &self,
        provider: Provider,
        credential: &CredentialToken,
    ) -> Result<Request, UpstreamError> {
        let endpoint = match provider {
            Provider::Primary => &self.primary_endpoint,
            Provider::Secondary => &self.secondary_endpoint,
        };
        let mut url = url::Url::parse(endpoint)
            .map_err(|e| UpstreamError::Handshake(format!("invalid {provider} endpoint: {e}")))?;

        if let (Provider::Secondary, Some(model)) = (provider, &self.secondary_model) {
            if !url.query_pairs().any(|(k, _)| k == "model") {
                url.query_pairs_mut().append_pair("model", model);
            }
        }

        if credential.kind() == CredentialKind::ApiKey {
            let param = match provider {
                Provider::Primary => "key",
                Provider::Secondary => "api-key",
            };
            url.query_pairs_mut().append_pair(param, credential.bearer());
        }

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| UpstreamError::Handshake(format!("invalid handshake request: {e}")))?;

        if credential.kind() == CredentialKind::AccessToken {
            let value = HeaderValue::from_str(&format!("Bearer {}", credential.bearer()))
                .map_err(|_| UpstreamError::Handshake("access token is not a valid header value".to_string()))?;
            request.headers_mut().insert(header::AUTHORIZATION, value);
        }

        Ok(request)
    }
}

#[async_trait]
impl UpstreamConnector for WsConnector {
    async fn connect(
        &self,
        provider: Provider,
        credential: &CredentialToken,
    ) -> Result<UpstreamLink, UpstreamError> {
        let request = self.handshake_request(provider, credential)?;
        let kind = provider_kind(provider, credential);

        let connected = tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(request))
            .await
            .map_err(|_| UpstreamError::Timeout(self.connect_timeout.as_millis() as u64))?;

        let (socket, _response) = connected.map_err(|e| match e {
            tungstenite::Error::Http(response) => UpstreamError::UnexpectedResponse {
                status: response.status().as_u16(),
            },
            // The request URL may carry a key; the message is not logged verbatim.
            other => UpstreamError::Handshake(other.to_string()),
        })?;

        tracing::debug!(provider = %provider, kind = %kind, "upstream socket open");
        let (sink, stream) = split_tungstenite(socket);
        Ok(UpstreamLink { kind, sink, stream })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{
        ErrorResponse, Request as ServerRequest, Response,
    };

    fn connector(primary: &str, secondary: &str) -> WsConnector {
        WsConnector::new(primary, secondary, Duration::from_secs(2))
    }

    #[test]
    fn access_token_goes_in_authorization_header() {
        let c = connector(DEFAULT_PRIMARY_ENDPOINT, DEFAULT_SECONDARY_ENDPOINT);
        let token = CredentialToken::access_token("ya29.abc", None, "delegated_identity");
        let request = c.handshake_request(Provider::Primary, &token).unwrap();
        assert_eq!(request.headers()[header::AUTHORIZATION], "Bearer ya29.abc");
        assert!(request.uri().query().is_none());
        assert_eq!(provider_kind(Provider::Primary, &token), ProviderKind::PrimaryOAuth);
    }

    #[test]
    fn keys_go_in_the_url() {
        let c = connector(DEFAULT_PRIMARY_ENDPOINT, DEFAULT_SECONDARY_ENDPOINT);
        let key = CredentialToken::api_key("k-1", "pre_shared_key");

        let request = c.handshake_request(Provider::Primary, &key).unwrap();
        assert_eq!(request.uri().query(), Some("key=k-1"));
        assert!(request.headers().get(header::AUTHORIZATION).is_none());
        assert_eq!(provider_kind(Provider::Primary, &key), ProviderKind::PrimaryKey);

        let request = c.handshake_request(Provider::Secondary, &key).unwrap();
        assert_eq!(request.uri().query(), Some("api-key=k-1"));
        assert_eq!(provider_kind(Provider::Secondary, &key), ProviderKind::Secondary);
    }

    #[test]
    fn secondary_url_names_the_model() {
        let c = connector(DEFAULT_PRIMARY_ENDPOINT, DEFAULT_SECONDARY_ENDPOINT)
            .with_secondary_model("gpt-4o-realtime-preview");
        let key = CredentialToken::api_key("k-1", "secondary");

        let request = c.handshake_request(Provider::Secondary, &key).unwrap();
        assert_eq!(request.uri().query(), Some("model=gpt-4o-realtime-preview&api-key=k-1"));

        let request = c.handshake_request(Provider::Primary, &key).unwrap();
        assert_eq!(request.uri().query(), Some("key=k-1"));

        let pinned = connector(DEFAULT_PRIMARY_ENDPOINT, "wss://realtime.example/v1?model=custom")
            .with_secondary_model("gpt-4o-realtime-preview");
        let request = pinned.handshake_request(Provider::Secondary, &key).unwrap();
        assert_eq!(request.uri().query(), Some("model=custom&api-key=k-1"));
    }

    #[tokio::test]
    async fn connects_and_exchanges_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let check = |req: &ServerRequest, resp: Response| -> Result<Response, ErrorResponse> {
                assert!(req.uri().query().unwrap_or_default().contains("key=secret"));
                Ok(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(stream, check).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
                ws.send(msg).await.unwrap();
            }
        });

        let url = format!("ws://{addr}/");
        let c = connector(&url, &url);
        let mut link = c
            .connect(Provider::Primary, &CredentialToken::api_key("secret", "pre_shared_key"))
            .await
            .unwrap();
        assert_eq!(link.kind, ProviderKind::PrimaryKey);

        link.sink.send(Frame::Text("ping".to_string())).await.unwrap();
        assert_eq!(link.stream.next().await.unwrap().unwrap(), Frame::Text("ping".to_string()));
    }

    #[tokio::test]
    async fn http_rejection_is_an_unexpected_response() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let _ = stream
                .write_all(b"HTTP/1.1 403 Forbidden\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await;
        });

        let url = format!("ws://{addr}/");
        let err = connector(&url, &url)
            .connect(Provider::Secondary, &CredentialToken::api_key("k", "secondary"))
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::UnexpectedResponse { status: 403 }), "{err:?}");
    }

    #[tokio::test]
    async fn refused_connection_is_a_handshake_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = format!("ws://{addr}/");
        let err = connector(&url, &url)
            .connect(Provider::Primary, &CredentialToken::api_key("k", "pre_shared_key"))
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Handshake(_)), "{err:?}");
    }
}
