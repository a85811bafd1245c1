//! Shared harness: a relay bound to a random port, a seeded session store,
//! and scriptable upstream providers.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{routing::post, Json, Router};
use cadence_credentials::CredentialToken;
use cadence_realtime::{UpstreamConnector, UpstreamError, UpstreamLink};
use cadence_server::config::{Config, ServiceEndpoint};
use cadence_server::{app, AppState};
use cadence_types::Provider;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub const ALICE_TOKEN: &str = "tok-alice";
pub const ROOT_TOKEN: &str = "tok-root";
pub const STALE_TOKEN: &str = "tok-stale";

pub type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

/// One connection accepted by a mock provider.
pub struct UpstreamSession {
    /// The first frame the relay sent: the provider setup message.
    pub setup: Value,
    /// Frames the relay sent after setup.
    pub inbound: mpsc::UnboundedReceiver<Message>,
    /// Frames to deliver to the relay.
    pub outbound: mpsc::UnboundedSender<Message>,
}

impl UpstreamSession {
    pub async fn next_inbound(&mut self) -> Message {
        tokio::time::timeout(WAIT, self.inbound.recv())
            .await
            .expect("timed out waiting for a frame from the relay")
            .expect("relay connection ended")
    }

    pub async fn next_inbound_json(&mut self) -> Value {
        match self.next_inbound().await {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    pub fn send_json(&self, value: Value) {
        self.outbound
            .send(Message::Text(value.to_string().into()))
            .unwrap();
    }
}

/// Starts a mock provider; every accepted connection arrives on the receiver.
pub async fn spawn_mock_upstream() -> (String, mpsc::UnboundedReceiver<UpstreamSession>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (session_tx, session_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let session_tx = session_tx.clone();
            tokio::spawn(async move {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                let (mut write, mut read) = ws.split();
                let setup = match read.next().await {
                    Some(Ok(Message::Text(text))) => serde_json::from_str(text.as_str()).unwrap(),
                    _ => return,
                };

                let (in_tx, in_rx) = mpsc::unbounded_channel();
                let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
                if session_tx
                    .send(UpstreamSession {
                        setup,
                        inbound: in_rx,
                        outbound: out_tx,
                    })
                    .is_err()
                {
                    return;
                }

                loop {
                    tokio::select! {
                        outgoing = out_rx.recv() => match outgoing {
                            Some(message) => {
                                if write.send(message).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        },
                        incoming = read.next() => match incoming {
                            Some(Ok(message)) => {
                                let _ = in_tx.send(message);
                            }
                            _ => break,
                        },
                    }
                }
            });
        }
    });

    (format!("ws://{addr}/"), session_rx)
}

/// An endpoint nothing listens on.
pub async fn refusing_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{addr}/")
}

pub async fn next_session(sessions: &mut mpsc::UnboundedReceiver<UpstreamSession>) -> UpstreamSession {
    tokio::time::timeout(WAIT, sessions.recv())
        .await
        .expect("timed out waiting for an upstream connection")
        .expect("mock upstream stopped")
}

/// Starts a JSON service that records request bodies and answers with `reply`.
pub async fn spawn_json_service(reply: Value) -> (String, Arc<Mutex<Vec<Value>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorded = seen.clone();
    let router = Router::new().route(
        "/",
        post(move |Json(body): Json<Value>| {
            let recorded = recorded.clone();
            let reply = reply.clone();
            async move {
                recorded.lock().unwrap().push(body);
                Json(reply)
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{addr}/"), seen)
}

/// Config pointing both providers at `primary` and `secondary`, with keys.
pub fn relay_config(primary: &str, secondary: &str) -> Config {
    let mut config = Config::default();
    config.primary.endpoint = primary.to_string();
    config.primary.api_key = Some("primary-key".to_string());
    config.primary.disable_oauth = true;
    config.secondary.endpoint = secondary.to_string();
    config.secondary.api_key = Some("secondary-key".to_string());
    config.relay.close_grace_ms = 20;
    config.relay.connect_timeout_ms = 2_000;
    config
}

pub fn with_delegate(mut config: Config, agent: &str, url: &str) -> Config {
    config
        .delegates
        .insert(agent.to_string(), ServiceEndpoint { url: url.to_string() });
    config
}

/// Counts connection attempts before handing off to the real connector.
pub struct CountingConnector {
    inner: Arc<dyn UpstreamConnector>,
    pub attempts: AtomicUsize,
}

#[async_trait]
impl UpstreamConnector for CountingConnector {
    async fn connect(
        &self,
        provider: Provider,
        credential: &CredentialToken,
    ) -> Result<UpstreamLink, UpstreamError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.inner.connect(provider, credential).await
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub connector: Arc<CountingConnector>,
    _db: tempfile::NamedTempFile,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    pub fn connect_attempts(&self) -> usize {
        self.connector.attempts.load(Ordering::SeqCst)
    }
}

/// Seeds the store and serves the relay on a random port.
///
/// Users: `u-alice` (role `user`, live and expired sessions) and `u-root`
/// (role `admin`).
pub async fn spawn_relay(config: Config) -> TestServer {
    let db = tempfile::NamedTempFile::new().unwrap();
    let pool = cadence_db::create_pool(
        db.path().to_str().unwrap(),
        cadence_db::DbRuntimeSettings::default(),
    )
    .unwrap();
    {
        let conn = pool.get().unwrap();
        cadence_db::run_migrations(&conn).unwrap();
        let now = chrono::Utc::now().timestamp();
        cadence_db::upsert_user(&conn, "u-alice", Some("alice@example.com"), Some("user")).unwrap();
        cadence_db::upsert_user(&conn, "u-root", Some("root@example.com"), Some("admin")).unwrap();
        cadence_db::insert_session(&conn, ALICE_TOKEN, "u-alice", now + 3_600).unwrap();
        cadence_db::insert_session(&conn, ROOT_TOKEN, "u-root", now + 3_600).unwrap();
        cadence_db::insert_session(&conn, STALE_TOKEN, "u-alice", now - 10).unwrap();
    }

    let mut state = AppState::from_config(&config, pool);
    let connector = Arc::new(CountingConnector {
        inner: state.upstream.connector.clone(),
        attempts: AtomicUsize::new(0),
    });
    state.upstream.connector = connector.clone();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app(state);
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        addr,
        connector,
        _db: db,
    }
}

/// Opens a relay session, passing the token as `x-session-token`.
pub async fn connect_with_header(url: &str, token: &str) -> ClientSocket {
    let mut request = url.into_client_request().unwrap();
    request
        .headers_mut()
        .insert("x-session-token", HeaderValue::from_str(token).unwrap());
    let (socket, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    socket
}

/// Next data or close frame from the relay, skipping keepalives.
pub async fn next_client_frame(socket: &mut ClientSocket) -> Message {
    loop {
        let message = tokio::time::timeout(WAIT, socket.next())
            .await
            .expect("timed out waiting for a relay frame")
            .expect("relay connection ended")
            .expect("relay transport error");
        match message {
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return other,
        }
    }
}

pub async fn next_client_json(socket: &mut ClientSocket) -> Value {
    match next_client_frame(socket).await {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

/// Reads the `connected` frame and returns its `server` field.
pub async fn expect_connected(socket: &mut ClientSocket, agent: &str) -> String {
    let connected = next_client_json(socket).await;
    assert_eq!(connected["type"], "connected");
    assert_eq!(connected["agent"], agent);
    connected["server"].as_str().unwrap().to_string()
}
