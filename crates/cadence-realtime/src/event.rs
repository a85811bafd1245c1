//! Upstream messages, classified once at the boundary.

use cadence_types::ToolCallEnvelope;

/// What an upstream JSON message means to the relay.
///
/// Produced by [`crate::ProtocolAdapter::classify`] so the pump never
/// inspects raw provider maps.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    /// The provider accepted the setup message.
    SetupAck,
    /// One or more tool calls, from a direct or a batch envelope.
    ToolCalls(Vec<ToolCallEnvelope>),
    /// Base64 audio produced by the model.
    AudioChunk {
        data: String,
        mime_type: Option<String>,
    },
    /// Incremental text or transcript.
    TextDelta(String),
    Unknown,
}

impl UpstreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SetupAck => "setup_ack",
            Self::ToolCalls(_) => "tool_calls",
            Self::AudioChunk { .. } => "audio_chunk",
            Self::TextDelta(_) => "text_delta",
            Self::Unknown => "unknown",
        }
    }

    pub fn into_tool_calls(self) -> Vec<ToolCallEnvelope> {
        match self {
            Self::ToolCalls(calls) => calls,
            _ => Vec::new(),
        }
    }
}
