//! The bidirectional message pump of an open relay session.
//!
//! Four tasks and an owner loop:
//!
//! - the client reader forwards every data frame upstream untouched
//! - the upstream reader forwards every data frame to the client, then
//!   classifies a copy and reports tool calls to the owner
//! - one writer per socket drains an mpsc channel, so each socket has a
//!   single writer and no locking
//! - the owner dispatches tool calls on spawned tasks and decides how the
//!   session ends
//!
//! Tool results are delivered through a weak sender: once the owner lets go
//! of the upstream channel a late result finds nothing to upgrade and is
//! dropped, while the dispatch itself is allowed to finish.

use cadence_realtime::{
    CloseReason, Frame, FrameSink, FrameStream, ProtocolAdapter, TransportError, UpstreamEvent,
    UpstreamLink, CLOSE_INTERNAL_ERROR, CLOSE_NORMAL,
};
use cadence_tools::ToolDispatcher;
use cadence_types::{AuthenticatedPrincipal, Persona, ToolCallEnvelope};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Upper bound on waiting for writers to flush their final frames.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the pump needs besides the two sockets.
#[derive(Clone)]
pub struct PumpContext {
    pub session_id: String,
    pub persona: Persona,
    pub principal: Arc<AuthenticatedPrincipal>,
    pub dispatcher: Arc<ToolDispatcher>,
    pub adapter: &'static dyn ProtocolAdapter,
    pub close_grace: Duration,
    pub channel_capacity: usize,
}

/// Why an open session ended abnormally.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("upstream closed the connection{}", close_detail(.0))]
    UpstreamClosed(Option<CloseReason>),

    #[error("upstream transport failed: {0}")]
    UpstreamTransport(TransportError),

    #[error("client transport failed: {0}")]
    ClientTransport(TransportError),
}

fn close_detail(reason: &Option<CloseReason>) -> String {
    match reason {
        Some(r) if !r.reason.is_empty() => format!(" ({}: {})", r.code, r.reason),
        Some(r) => format!(" ({})", r.code),
        None => String::new(),
    }
}

impl RelayError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UpstreamClosed(_) => "upstream_closed",
            Self::UpstreamTransport(_) => "upstream_transport_failed",
            Self::ClientTransport(_) => "client_transport_failed",
        }
    }
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// The client went away; upstream was closed in turn.
    ClientClosed(Option<RelayError>),
    /// Upstream went away; the client got an error frame and a 1011 close.
    UpstreamClosed(RelayError),
}

enum SessionEvent {
    ToolCalls(Vec<ToolCallEnvelope>),
    ClientGone(Option<RelayError>),
    UpstreamGone(RelayError),
}

async fn write_frames(
    mut rx: mpsc::Receiver<Frame>,
    mut sink: FrameSink,
    events: mpsc::Sender<SessionEvent>,
    on_error: fn(TransportError) -> SessionEvent,
) {
    while let Some(frame) = rx.recv().await {
        let closing = frame.is_close();
        if let Err(e) = sink.send(frame).await {
            let _ = events.send(on_error(e)).await;
            return;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_client(
    mut stream: FrameStream,
    upstream: mpsc::Sender<Frame>,
    events: mpsc::Sender<SessionEvent>,
) {
    let error = loop {
        match stream.next().await {
            Some(Ok(Frame::Close(_))) | None => break None,
            // Control frames are answered per hop by the socket libraries.
            Some(Ok(Frame::Ping(_) | Frame::Pong(_))) => continue,
            Some(Ok(frame)) => {
                if upstream.send(frame).await.is_err() {
                    // The upstream writer stopped and has reported why.
                    return;
                }
            }
            Some(Err(e)) => break Some(RelayError::ClientTransport(e)),
        }
    };
    let _ = events.send(SessionEvent::ClientGone(error)).await;
}

async fn read_upstream(
    mut stream: FrameStream,
    client: mpsc::Sender<Frame>,
    events: mpsc::Sender<SessionEvent>,
    adapter: &'static dyn ProtocolAdapter,
    session_id: String,
) {
    let error = loop {
        let frame = match stream.next().await {
            Some(Ok(Frame::Close(reason))) => break RelayError::UpstreamClosed(reason),
            Some(Ok(Frame::Ping(_) | Frame::Pong(_))) => continue,
            Some(Ok(frame)) => frame,
            Some(Err(e)) => break RelayError::UpstreamTransport(e),
            None => break RelayError::UpstreamClosed(None),
        };

        // Forward before inspecting so the client stream keeps arrival order.
        let inspected = frame.clone();
        if client.send(frame).await.is_err() {
            return;
        }

        let Some(message) = inspected.as_json() else {
            continue;
        };
        match adapter.classify(&message) {
            UpstreamEvent::ToolCalls(calls) => {
                if events.send(SessionEvent::ToolCalls(calls)).await.is_err() {
                    return;
                }
            }
            UpstreamEvent::SetupAck => {
                tracing::debug!(session_id = %session_id, "upstream acknowledged setup");
            }
            other => {
                tracing::trace!(session_id = %session_id, event = other.kind(), "upstream event");
            }
        }
    };
    let _ = events.send(SessionEvent::UpstreamGone(error)).await;
}

fn spawn_dispatch(ctx: &PumpContext, call: ToolCallEnvelope, upstream: mpsc::WeakSender<Frame>) {
    let dispatcher = ctx.dispatcher.clone();
    let principal = ctx.principal.clone();
    let session_id = ctx.session_id.clone();
    let adapter = ctx.adapter;

    tokio::spawn(async move {
        let result = dispatcher.dispatch(&principal, &session_id, &call).await;
        let frames = adapter.build_tool_response(&call, &result);

        let Some(upstream) = upstream.upgrade() else {
            tracing::debug!(session_id = %session_id, tool = %call.name, "session closed, dropping tool result");
            return;
        };
        for frame in frames {
            if upstream.send(Frame::Text(frame.to_string())).await.is_err() {
                tracing::debug!(session_id = %session_id, tool = %call.name, "session closed, dropping tool result");
                return;
            }
        }
    });
}

/// Relays frames until either side goes away.
///
/// The client first receives the `connected` frame. An upstream drop is
/// reported with one error frame, then a 1011 close after the grace delay.
/// A client drop closes upstream immediately.
pub async fn pump(
    ctx: PumpContext,
    client_sink: FrameSink,
    client_stream: FrameStream,
    upstream: UpstreamLink,
) -> SessionEnd {
    let capacity = ctx.channel_capacity.max(1);
    let (client_tx, client_rx) = mpsc::channel::<Frame>(capacity);
    let (upstream_tx, upstream_rx) = mpsc::channel::<Frame>(capacity);
    let (event_tx, mut event_rx) = mpsc::channel::<SessionEvent>(capacity);

    let server = upstream.kind.provider().as_str();
    let _ = client_tx.send(Frame::connected(ctx.persona.as_str(), server)).await;

    let client_writer = tokio::spawn(write_frames(
        client_rx,
        client_sink,
        event_tx.clone(),
        |e| SessionEvent::ClientGone(Some(RelayError::ClientTransport(e))),
    ));
    let upstream_writer = tokio::spawn(write_frames(
        upstream_rx,
        upstream.sink,
        event_tx.clone(),
        |e| SessionEvent::UpstreamGone(RelayError::UpstreamTransport(e)),
    ));
    let client_reader = tokio::spawn(read_client(client_stream, upstream_tx.clone(), event_tx.clone()));
    let upstream_reader = tokio::spawn(read_upstream(
        upstream.stream,
        client_tx.clone(),
        event_tx.clone(),
        ctx.adapter,
        ctx.session_id.clone(),
    ));
    drop(event_tx);

    tracing::info!(
        session_id = %ctx.session_id,
        persona = %ctx.persona,
        provider = server,
        kind = %upstream.kind,
        principal_id = %ctx.principal.id,
        "relay session open"
    );

    let mut dispatched: HashSet<String> = HashSet::new();
    let end = loop {
        match event_rx.recv().await {
            Some(SessionEvent::ToolCalls(calls)) => {
                for call in calls {
                    // Providers may announce one call in both a direct and a batch envelope.
                    if let Some(id) = &call.correlation_id {
                        if !dispatched.insert(id.clone()) {
                            tracing::debug!(session_id = %ctx.session_id, call_id = %id, "duplicate tool call ignored");
                            continue;
                        }
                    }
                    tracing::info!(session_id = %ctx.session_id, tool = %call.name, "dispatching tool call");
                    spawn_dispatch(&ctx, call, upstream_tx.downgrade());
                }
            }
            Some(SessionEvent::ClientGone(error)) => break SessionEnd::ClientClosed(error),
            Some(SessionEvent::UpstreamGone(error)) => break SessionEnd::UpstreamClosed(error),
            None => break SessionEnd::ClientClosed(None),
        }
    };

    match &end {
        SessionEnd::ClientClosed(error) => {
            tracing::info!(session_id = %ctx.session_id, error = ?error, "client closed, closing upstream");
            upstream_reader.abort();
            client_reader.abort();
            let _ = upstream_tx.try_send(Frame::close(CLOSE_NORMAL, "client closed"));
        }
        SessionEnd::UpstreamClosed(error) => {
            tracing::warn!(session_id = %ctx.session_id, code = error.code(), error = %error, "upstream closed mid-session");
            upstream_reader.abort();
            client_reader.abort();
            let _ = client_tx.send(Frame::error(error.code(), &error.to_string())).await;
            tokio::time::sleep(ctx.close_grace).await;
            let _ = client_tx.send(Frame::close(CLOSE_INTERNAL_ERROR, "upstream closed")).await;
        }
    }
    drop(upstream_tx);
    drop(client_tx);

    let _ = tokio::time::timeout(FLUSH_TIMEOUT, client_writer).await;
    let _ = tokio::time::timeout(FLUSH_TIMEOUT, upstream_writer).await;
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cadence_realtime::adapter_for;
    use cadence_tools::{ChatDelegate, ChatRequest, ToolDispatchError, Unconfigured};
    use cadence_types::{Provider, ProviderKind};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_stream::wrappers::ReceiverStream;

    struct CountingDelegate(AtomicUsize);

    #[async_trait]
    impl ChatDelegate for CountingDelegate {
        async fn chat(&self, request: ChatRequest) -> Result<Value, ToolDispatchError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"reply": format!("re: {}", request.message)}))
        }
    }

    struct Ends {
        client_in: mpsc::Sender<Result<Frame, TransportError>>,
        client_out: mpsc::Receiver<Frame>,
        upstream_in: mpsc::Sender<Result<Frame, TransportError>>,
        upstream_out: mpsc::Receiver<Frame>,
    }

    fn sink_into(tx: mpsc::Sender<Frame>) -> FrameSink {
        Box::pin(futures_util::sink::unfold(tx, |tx, frame: Frame| async move {
            tx.send(frame).await.map_err(|_| TransportError::Closed)?;
            Ok::<_, TransportError>(tx)
        }))
    }

    fn failing_sink() -> FrameSink {
        Box::pin(futures_util::sink::unfold((), |(), _frame: Frame| async move {
            Err::<(), _>(TransportError::Socket("broken pipe".to_string()))
        }))
    }

    fn start(provider: Provider, delegate: Arc<CountingDelegate>) -> (Ends, tokio::task::JoinHandle<SessionEnd>) {
        start_with(provider, delegate, None)
    }

    fn start_with(
        provider: Provider,
        delegate: Arc<CountingDelegate>,
        upstream_sink: Option<FrameSink>,
    ) -> (Ends, tokio::task::JoinHandle<SessionEnd>) {
        let (client_in, client_in_rx) = mpsc::channel(64);
        let (client_out_tx, client_out) = mpsc::channel(64);
        let (upstream_in, upstream_in_rx) = mpsc::channel(64);
        let (upstream_out_tx, upstream_out) = mpsc::channel(64);

        let dispatcher = ToolDispatcher::new(Arc::new(Unconfigured("admin service")))
            .with_delegate("laura-oracle", delegate);
        let ctx = PumpContext {
            session_id: "test-session".to_string(),
            persona: Persona::Tutor,
            principal: Arc::new(AuthenticatedPrincipal {
                id: "u1".to_string(),
                email: None,
                role: None,
            }),
            dispatcher: Arc::new(dispatcher),
            adapter: adapter_for(provider),
            close_grace: Duration::from_millis(10),
            channel_capacity: 16,
        };
        let kind = match provider {
            Provider::Primary => ProviderKind::PrimaryKey,
            Provider::Secondary => ProviderKind::Secondary,
        };
        let link = UpstreamLink {
            kind,
            sink: upstream_sink.unwrap_or_else(|| sink_into(upstream_out_tx)),
            stream: Box::pin(ReceiverStream::new(upstream_in_rx)),
        };
        let handle = tokio::spawn(pump(
            ctx,
            sink_into(client_out_tx),
            Box::pin(ReceiverStream::new(client_in_rx)),
            link,
        ));
        (
            Ends {
                client_in,
                client_out,
                upstream_in,
                upstream_out,
            },
            handle,
        )
    }

    #[tokio::test]
    async fn connected_frame_precedes_upstream_traffic() {
        let (mut ends, _handle) = start(Provider::Primary, Arc::new(CountingDelegate(AtomicUsize::new(0))));
        ends.upstream_in.send(Ok(Frame::Text("{\"a\":1}".into()))).await.unwrap();

        let first = ends.client_out.recv().await.unwrap().as_json().unwrap();
        assert_eq!(first, json!({"type": "connected", "agent": "tutor", "server": "gemini-live"}));
        assert_eq!(ends.client_out.recv().await.unwrap(), Frame::Text("{\"a\":1}".into()));
    }

    #[tokio::test]
    async fn duplicate_correlation_ids_dispatch_once() {
        let delegate = Arc::new(CountingDelegate(AtomicUsize::new(0)));
        let (mut ends, _handle) = start(Provider::Secondary, delegate.clone());

        let direct = json!({
            "type": "response.function_call_arguments.done",
            "call_id": "c1", "name": "background_agent_chat",
            "arguments": "{\"agent\":\"laura-oracle\",\"message\":\"hi\"}"
        });
        let batch = json!({
            "type": "response.done",
            "response": {"output": [{
                "type": "function_call", "call_id": "c1", "name": "background_agent_chat",
                "arguments": "{\"agent\":\"laura-oracle\",\"message\":\"hi\"}"
            }]}
        });
        ends.upstream_in.send(Ok(Frame::Text(direct.to_string()))).await.unwrap();
        ends.upstream_in.send(Ok(Frame::Text(batch.to_string()))).await.unwrap();

        let item = ends.upstream_out.recv().await.unwrap().as_json().unwrap();
        assert_eq!(item["type"], "conversation.item.create");
        assert_eq!(item["item"]["call_id"], "c1");
        let create = ends.upstream_out.recv().await.unwrap().as_json().unwrap();
        assert_eq!(create["type"], "response.create");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(delegate.0.load(Ordering::SeqCst), 1);
        assert!(ends.upstream_out.try_recv().is_err());
    }

    #[tokio::test]
    async fn upstream_close_sends_one_error_then_internal_error_close() {
        let (mut ends, handle) = start(Provider::Primary, Arc::new(CountingDelegate(AtomicUsize::new(0))));
        ends.upstream_in
            .send(Ok(Frame::close(1001, "going away")))
            .await
            .unwrap();

        let _connected = ends.client_out.recv().await.unwrap();
        let error = ends.client_out.recv().await.unwrap().as_json().unwrap();
        assert_eq!(error["type"], "error");
        assert_eq!(error["code"], "upstream_closed");
        match ends.client_out.recv().await.unwrap() {
            Frame::Close(Some(reason)) => assert_eq!(reason.code, CLOSE_INTERNAL_ERROR),
            other => panic!("expected close, got {other:?}"),
        }
        assert!(matches!(handle.await.unwrap(), SessionEnd::UpstreamClosed(_)));
    }

    #[tokio::test]
    async fn client_close_closes_upstream() {
        let (mut ends, handle) = start(Provider::Primary, Arc::new(CountingDelegate(AtomicUsize::new(0))));
        ends.client_in.send(Ok(Frame::Binary(vec![1, 2, 3].into()))).await.unwrap();
        assert_eq!(ends.upstream_out.recv().await.unwrap(), Frame::Binary(vec![1, 2, 3].into()));

        drop(ends.client_in);
        assert!(ends.upstream_out.recv().await.unwrap().is_close());
        assert!(matches!(handle.await.unwrap(), SessionEnd::ClientClosed(None)));
    }

    #[tokio::test]
    async fn upstream_write_failure_releases_the_upstream_reader() {
        let delegate = Arc::new(CountingDelegate(AtomicUsize::new(0)));
        let (mut ends, handle) = start_with(Provider::Primary, delegate, Some(failing_sink()));
        ends.client_in.send(Ok(Frame::Text("{\"turn\":1}".into()))).await.unwrap();

        let _connected = ends.client_out.recv().await.unwrap();
        let error = ends.client_out.recv().await.unwrap().as_json().unwrap();
        assert_eq!(error["code"], "upstream_transport_failed");
        match ends.client_out.recv().await.unwrap() {
            Frame::Close(Some(reason)) => assert_eq!(reason.code, CLOSE_INTERNAL_ERROR),
            other => panic!("expected close, got {other:?}"),
        }
        assert!(matches!(
            handle.await.unwrap(),
            SessionEnd::UpstreamClosed(RelayError::UpstreamTransport(_))
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(ends.upstream_in.is_closed(), "upstream stream still held after the session ended");
    }
}
