//! Transport-neutral WebSocket frames.
//!
//! The client side of a session is an axum socket and the upstream side is a
//! tungstenite client. The relay pump only ever sees [`Frame`] values through
//! the boxed [`FrameSink`] / [`FrameStream`] pair, so it is agnostic to which
//! library produced them and can be driven by in-memory channels in tests.

use crate::error::TransportError;
use bytes::Bytes;
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use std::pin::Pin;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// Close code sent to the client when the session ends abnormally.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Close code for a normal close.
pub const CLOSE_NORMAL: u16 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

/// A single WebSocket message as seen by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<CloseReason>),
}

impl Frame {
    pub fn is_close(&self) -> bool {
        matches!(self, Self::Close(_))
    }

    /// Parses the frame payload as JSON, if it is one.
    ///
    /// Providers may deliver JSON in binary frames, so both data variants are
    /// tried. Returns `None` for control frames and for payloads that are not
    /// JSON.
    pub fn as_json(&self) -> Option<Value> {
        match self {
            Self::Text(text) => serde_json::from_str(text).ok(),
            Self::Binary(data) => serde_json::from_slice(data).ok(),
            _ => None,
        }
    }

    /// Builds the `{type:"connected"}` frame sent once the session is open.
    pub fn connected(agent: &str, server: &str) -> Self {
        Self::Text(json!({"type": "connected", "agent": agent, "server": server}).to_string())
    }

    /// Builds the `{type:"error"}` frame sent before a terminal close.
    pub fn error(code: &str, message: &str) -> Self {
        Self::Text(json!({"type": "error", "code": code, "message": message}).to_string())
    }

    pub fn close(code: u16, reason: impl Into<String>) -> Self {
        Self::Close(Some(CloseReason {
            code,
            reason: reason.into(),
        }))
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data),
            Frame::Ping(data) => Message::Ping(data),
            Frame::Pong(data) => Message::Pong(data),
            Frame::Close(reason) => Message::Close(reason.map(|r| CloseFrame {
                code: CloseCode::from(r.code),
                reason: r.reason.into(),
            })),
        }
    }
}

impl Frame {
    /// Converts a tungstenite message; raw frames are never surfaced by the
    /// reader and map to `None`.
    pub fn from_message(message: Message) -> Option<Self> {
        Some(match message {
            Message::Text(text) => Frame::Text(text.as_str().to_owned()),
            Message::Binary(data) => Frame::Binary(data),
            Message::Ping(data) => Frame::Ping(data),
            Message::Pong(data) => Frame::Pong(data),
            Message::Close(close) => Frame::Close(close.map(|c| CloseReason {
                code: u16::from(c.code),
                reason: c.reason.as_str().to_owned(),
            })),
            Message::Frame(_) => return None,
        })
    }
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// Splits a tungstenite socket into the relay's boxed frame halves.
pub fn split_tungstenite<S>(socket: S) -> (FrameSink, FrameStream)
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Send
        + 'static,
{
    let (sink, stream) = socket.split();
    let sink = sink
        .sink_map_err(TransportError::from)
        .with(|frame: Frame| future::ready(Ok::<_, TransportError>(Message::from(frame))));
    let stream = stream.filter_map(|item| {
        future::ready(match item {
            Ok(message) => Frame::from_message(message).map(Ok),
            Err(e) => Some(Err(TransportError::from(e))),
        })
    });
    (Box::pin(sink), Box::pin(stream))
}
