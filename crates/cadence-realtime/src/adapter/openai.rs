//! OpenAI Realtime dialect, used by the secondary provider.

use super::{ProtocolAdapter, SessionConfig};
use crate::event::UpstreamEvent;
use cadence_types::{Modality, Provider, ToolCallEnvelope, ToolResult};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiRealtimeAdapter;

impl OpenAiRealtimeAdapter {
    /// Arguments arrive as a JSON-encoded string.
    fn parse_arguments(raw: Option<&Value>) -> Value {
        match raw {
            Some(Value::String(s)) if s.trim().is_empty() => json!({}),
            Some(Value::String(s)) => serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())),
            Some(other) => other.clone(),
            None => json!({}),
        }
    }

    fn call_from(value: &Value) -> Option<ToolCallEnvelope> {
        let name = value.get("name")?.as_str()?;
        let call = ToolCallEnvelope::new(name, Self::parse_arguments(value.get("arguments")));
        Some(match value.get("call_id").and_then(Value::as_str) {
            Some(id) => call.with_correlation_id(id),
            None => call,
        })
    }
}

impl ProtocolAdapter for OpenAiRealtimeAdapter {
    fn provider(&self) -> Provider {
        Provider::Secondary
    }

    fn build_setup(&self, config: &SessionConfig) -> Value {
        let modalities: Vec<&str> = config
            .modalities
            .iter()
            .map(|m| match m {
                Modality::Audio => "audio",
                Modality::Text => "text",
            })
            .collect();
        let tools: Vec<Value> = config
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                })
            })
            .collect();

        json!({
            "type": "session.update",
            "session": {
                "model": config.model,
                "modalities": modalities,
                "instructions": config.system_instruction(),
                "tools": tools,
                "tool_choice": "auto"
            }
        })
    }

    fn classify(&self, message: &Value) -> UpstreamEvent {
        let Some(kind) = message.get("type").and_then(Value::as_str) else {
            return UpstreamEvent::Unknown;
        };
        match kind {
            "session.created" | "session.updated" => UpstreamEvent::SetupAck,
            "response.function_call_arguments.done" => Self::call_from(message)
                .map(|call| UpstreamEvent::ToolCalls(vec![call]))
                .unwrap_or(UpstreamEvent::Unknown),
            "response.done" => {
                let calls: Vec<ToolCallEnvelope> = message
                    .pointer("/response/output")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter(|item| item.get("type").and_then(Value::as_str) == Some("function_call"))
                            .filter_map(Self::call_from)
                            .collect()
                    })
                    .unwrap_or_default();
                if calls.is_empty() {
                    UpstreamEvent::Unknown
                } else {
                    UpstreamEvent::ToolCalls(calls)
                }
            }
            "response.audio.delta" => match message.get("delta").and_then(Value::as_str) {
                Some(data) => UpstreamEvent::AudioChunk {
                    data: data.to_string(),
                    mime_type: None,
                },
                None => UpstreamEvent::Unknown,
            },
            "response.text.delta" | "response.audio_transcript.delta" => {
                match message.get("delta").and_then(Value::as_str) {
                    Some(delta) => UpstreamEvent::TextDelta(delta.to_string()),
                    None => UpstreamEvent::Unknown,
                }
            }
            _ => UpstreamEvent::Unknown,
        }
    }

    fn build_tool_response(&self, call: &ToolCallEnvelope, result: &ToolResult) -> Vec<Value> {
        let mut item = json!({
            "type": "function_call_output",
            "output": result.to_payload().to_string(),
        });
        if let Some(id) = &call.correlation_id {
            item["call_id"] = json!(id);
        }
        vec![
            json!({ "type": "conversation.item.create", "item": item }),
            json!({ "type": "response.create" }),
        ]
    }
}
