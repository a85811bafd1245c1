//! Provider protocol adapters.
//!
//! Each upstream speaks its own JSON dialect for session setup, tool calls,
//! and tool results. An adapter translates between those shapes and the
//! relay's neutral types; the relay picks one per connection attempt with
//! [`adapter_for`].

mod gemini;
mod openai;

pub use gemini::GeminiLiveAdapter;
pub use openai::OpenAiRealtimeAdapter;

use crate::event::UpstreamEvent;
use cadence_types::{Modality, Persona, Provider, ToolCallEnvelope, ToolDeclaration, ToolResult};
use serde_json::Value;

/// Everything an adapter needs to build a setup message.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub model: String,
    pub persona: Persona,
    pub modalities: Vec<Modality>,
    pub tools: Vec<ToolDeclaration>,
}

impl SessionConfig {
    /// Audio and text responses, with the persona's instruction.
    pub fn new(model: impl Into<String>, persona: Persona, tools: Vec<ToolDeclaration>) -> Self {
        Self {
            model: model.into(),
            persona,
            modalities: vec![Modality::Audio, Modality::Text],
            tools,
        }
    }

    pub fn system_instruction(&self) -> &'static str {
        self.persona.system_instruction()
    }
}

/// Translation between one provider's wire protocol and the relay's types.
pub trait ProtocolAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// The first message sent after the upstream socket opens.
    fn build_setup(&self, config: &SessionConfig) -> Value;

    /// Classifies one upstream JSON message.
    fn classify(&self, message: &Value) -> UpstreamEvent;

    /// Extracts tool calls from a message; empty when it carries none.
    fn recognize_tool_calls(&self, message: &Value) -> Vec<ToolCallEnvelope> {
        self.classify(message).into_tool_calls()
    }

    /// Messages that deliver `result` for `call`, in send order.
    fn build_tool_response(&self, call: &ToolCallEnvelope, result: &ToolResult) -> Vec<Value>;
}

static GEMINI_LIVE: GeminiLiveAdapter = GeminiLiveAdapter;
static OPENAI_REALTIME: OpenAiRealtimeAdapter = OpenAiRealtimeAdapter;

pub fn adapter_for(provider: Provider) -> &'static dyn ProtocolAdapter {
    match provider {
        Provider::Primary => &GEMINI_LIVE,
        Provider::Secondary => &OPENAI_REALTIME,
    }
}

/// Reads `object[a]`, falling back to `object[b]`.
///
/// Providers are inconsistent about camelCase versus snake_case keys.
fn field<'a>(object: &'a Value, a: &str, b: &str) -> Option<&'a Value> {
    object.get(a).or_else(|| object.get(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapters_are_selected_by_provider() {
        assert_eq!(adapter_for(Provider::Primary).provider(), Provider::Primary);
        assert_eq!(adapter_for(Provider::Secondary).provider(), Provider::Secondary);
    }

    #[test]
    fn session_config_requests_audio_and_text() {
        let config = SessionConfig::new("m", Persona::Tutor, vec![]);
        assert_eq!(config.modalities, vec![Modality::Audio, Modality::Text]);
        assert_eq!(config.system_instruction(), Persona::Tutor.system_instruction());
    }
}
