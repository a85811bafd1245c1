//! Upstream plumbing for realtime voice sessions.
//!
//! - [`frame`]: the transport-neutral [`Frame`] and the boxed sink/stream
//!   halves the relay pump is written against
//! - [`adapter`]: one [`ProtocolAdapter`] per provider dialect
//! - [`event`]: the classified [`UpstreamEvent`] union
//! - [`connector`]: opens the upstream socket with a credential attached

pub mod adapter;
pub mod connector;
pub mod error;
pub mod event;
pub mod frame;

pub use adapter::{adapter_for, GeminiLiveAdapter, OpenAiRealtimeAdapter, ProtocolAdapter, SessionConfig};
pub use connector::{
    provider_kind, UpstreamConnector, UpstreamLink, WsConnector, DEFAULT_PRIMARY_ENDPOINT,
    DEFAULT_SECONDARY_ENDPOINT,
};
pub use error::{TransportError, UpstreamError};
pub use event::UpstreamEvent;
pub use frame::{split_tungstenite, CloseReason, Frame, FrameSink, FrameStream, CLOSE_INTERNAL_ERROR, CLOSE_NORMAL};
