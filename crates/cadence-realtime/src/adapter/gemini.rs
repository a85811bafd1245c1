//! Gemini Live (`BidiGenerateContent`) dialect.

use super::{field, ProtocolAdapter, SessionConfig};
use crate::event::UpstreamEvent;
use cadence_types::{Modality, Provider, ToolCallEnvelope, ToolResult};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiLiveAdapter;

impl GeminiLiveAdapter {
    fn call_from(value: &Value) -> Option<ToolCallEnvelope> {
        let name = value.get("name")?.as_str()?;
        let args = field(value, "args", "arguments")
            .cloned()
            .unwrap_or_else(|| json!({}));
        let call = ToolCallEnvelope::new(name, args);
        Some(match value.get("id").and_then(Value::as_str) {
            Some(id) => call.with_correlation_id(id),
            None => call,
        })
    }

    fn tool_calls(tool_call: &Value) -> Vec<ToolCallEnvelope> {
        if let Some(batch) = field(tool_call, "functionCalls", "function_calls").and_then(Value::as_array) {
            return batch.iter().filter_map(Self::call_from).collect();
        }
        Self::call_from(tool_call).into_iter().collect()
    }

    fn server_content(content: &Value) -> UpstreamEvent {
        let parts = field(content, "modelTurn", "model_turn")
            .and_then(|turn| turn.get("parts"))
            .and_then(Value::as_array);
        let Some(parts) = parts else {
            return UpstreamEvent::Unknown;
        };

        let mut text = String::new();
        for part in parts {
            if let Some(inline) = field(part, "inlineData", "inline_data") {
                if let Some(data) = inline.get("data").and_then(Value::as_str) {
                    return UpstreamEvent::AudioChunk {
                        data: data.to_string(),
                        mime_type: field(inline, "mimeType", "mime_type")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                    };
                }
            }
            if let Some(t) = part.get("text").and_then(Value::as_str) {
                text.push_str(t);
            }
        }
        if text.is_empty() {
            UpstreamEvent::Unknown
        } else {
            UpstreamEvent::TextDelta(text)
        }
    }
}

impl ProtocolAdapter for GeminiLiveAdapter {
    fn provider(&self) -> Provider {
        Provider::Primary
    }

    fn build_setup(&self, config: &SessionConfig) -> Value {
        let modalities: Vec<&str> = config
            .modalities
            .iter()
            .map(|m| match m {
                Modality::Audio => "AUDIO",
                Modality::Text => "TEXT",
            })
            .collect();
        let declarations: Vec<Value> = config
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                })
            })
            .collect();

        json!({
            "setup": {
                "model": config.model,
                "generation_config": {
                    "response_modalities": modalities,
                    "speech_config": {
                        "voice_config": {
                            "prebuilt_voice_config": { "voice_name": config.persona.voice() }
                        }
                    }
                },
                "system_instruction": {
                    "parts": [{ "text": config.system_instruction() }]
                },
                "tools": [{ "function_declarations": declarations }]
            }
        })
    }

    fn classify(&self, message: &Value) -> UpstreamEvent {
        if field(message, "setupComplete", "setup_complete").is_some() {
            return UpstreamEvent::SetupAck;
        }
        if let Some(tool_call) = field(message, "toolCall", "tool_call") {
            let calls = Self::tool_calls(tool_call);
            if !calls.is_empty() {
                return UpstreamEvent::ToolCalls(calls);
            }
        }
        if let Some(content) = field(message, "serverContent", "server_content") {
            return Self::server_content(content);
        }
        UpstreamEvent::Unknown
    }

    fn build_tool_response(&self, call: &ToolCallEnvelope, result: &ToolResult) -> Vec<Value> {
        let mut response = json!({
            "name": call.name,
            "response": result.to_payload(),
        });
        if let Some(id) = &call.correlation_id {
            response["id"] = json!(id);
        }
        vec![json!({ "tool_response": { "function_responses": [response] } })]
    }
}
