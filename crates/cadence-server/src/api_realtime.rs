//! Realtime voice endpoints: one upgrade route per persona.
//!
//! Authentication and throttling run as middleware in front of these
//! handlers, so by the time the upgrade extractor runs the request already
//! carries an [`AuthenticatedPrincipal`].

use crate::failover::FailoverController;
use crate::relay::{self, PumpContext, SessionEnd};
use crate::AppState;
use axum::{
    extract::{
        ws::{CloseFrame, Message as AxumMessage, WebSocket, WebSocketUpgrade},
        ConnectInfo,
    },
    response::IntoResponse,
    Extension,
};
use cadence_realtime::{CloseReason, Frame, FrameSink, FrameStream, TransportError, CLOSE_INTERNAL_ERROR};
use cadence_types::{AuthenticatedPrincipal, Persona};
use futures_util::{future, SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;

fn frame_from_axum(message: AxumMessage) -> Frame {
    match message {
        AxumMessage::Text(text) => Frame::Text(text.as_str().to_owned()),
        AxumMessage::Binary(data) => Frame::Binary(data),
        AxumMessage::Ping(data) => Frame::Ping(data),
        AxumMessage::Pong(data) => Frame::Pong(data),
        AxumMessage::Close(close) => Frame::Close(close.map(|c| CloseReason {
            code: c.code,
            reason: c.reason.as_str().to_owned(),
        })),
    }
}

fn frame_to_axum(frame: Frame) -> AxumMessage {
    match frame {
        Frame::Text(text) => AxumMessage::Text(text.into()),
        Frame::Binary(data) => AxumMessage::Binary(data),
        Frame::Ping(data) => AxumMessage::Ping(data),
        Frame::Pong(data) => AxumMessage::Pong(data),
        Frame::Close(reason) => AxumMessage::Close(reason.map(|r| CloseFrame {
            code: r.code,
            reason: r.reason.into(),
        })),
    }
}

/// Splits the client socket into the relay's boxed frame halves.
fn split_axum(socket: WebSocket) -> (FrameSink, FrameStream) {
    let (sink, stream) = socket.split();
    let sink = sink
        .sink_map_err(|e| TransportError::Socket(e.to_string()))
        .with(|frame: Frame| future::ready(Ok::<_, TransportError>(frame_to_axum(frame))));
    let stream = stream.map(|item| {
        item.map(frame_from_axum)
            .map_err(|e| TransportError::Socket(e.to_string()))
    });
    (Box::pin(sink), Box::pin(stream))
}

/// `GET /api/realtime/tutor`
pub async fn tutor_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade(state, Persona::Tutor, principal, addr, ws)
}

/// `GET /api/realtime/operator`
pub async fn operator_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade(state, Persona::Operator, principal, addr, ws)
}

fn upgrade(
    state: Arc<AppState>,
    persona: Persona,
    principal: AuthenticatedPrincipal,
    addr: SocketAddr,
    ws: WebSocketUpgrade,
) -> axum::response::Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, persona, principal, addr))
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    persona: Persona,
    principal: AuthenticatedPrincipal,
    addr: SocketAddr,
) {
    let session_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(
        session_id = %session_id,
        persona = %persona,
        principal_id = %principal.id,
        remote_addr = %addr,
        "realtime connection accepted"
    );

    let (mut client_sink, client_stream) = split_axum(socket);

    let mut controller = FailoverController::new(&state.upstream, &state.relay, &session_id);
    let open = match controller
        .establish(persona, cadence_tools::declarations_for(persona))
        .await
    {
        Ok(open) => open,
        Err(e) => {
            let message = if state.relay.mode.is_production() {
                "the voice service is currently unavailable".to_string()
            } else {
                e.to_string()
            };
            let _ = client_sink.send(Frame::error(e.code(), &message)).await;
            let _ = client_sink
                .send(Frame::close(CLOSE_INTERNAL_ERROR, "upstream unavailable"))
                .await;
            tracing::warn!(session_id = %session_id, code = e.code(), "realtime session closed before open");
            return;
        }
    };

    let ctx = PumpContext {
        session_id: session_id.clone(),
        persona,
        principal: Arc::new(principal),
        dispatcher: state.dispatcher.clone(),
        adapter: open.adapter,
        close_grace: state.relay.close_grace,
        channel_capacity: state.relay.channel_capacity,
    };

    match relay::pump(ctx, client_sink, client_stream, open.link).await {
        SessionEnd::ClientClosed(_) => {
            tracing::info!(session_id = %session_id, "realtime session ended by client");
        }
        SessionEnd::UpstreamClosed(e) => {
            tracing::info!(session_id = %session_id, code = e.code(), "realtime session ended by upstream");
        }
    }
}
