//! Shared types for the Cadence realtime relay.
//!
//! This crate holds the value types that cross crate boundaries: the agent
//! persona a client connected to, the principal produced by session
//! authentication, the upstream provider identity, and the tool-call
//! envelope/result pair that flows between the protocol adapters and the
//! tool dispatcher.
//!
//! Nothing in here performs I/O. Keeping it dependency-light lets every other
//! crate in the workspace depend on it without pulling in the network stack.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

/// The fixed system-instruction and voice profile selected by the endpoint a
/// client connected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Persona {
    /// Learner-facing voice tutor.
    Tutor,
    /// Staff-facing operations assistant.
    Operator,
}

impl Persona {
    /// All personas, in endpoint registration order.
    pub const ALL: [Persona; 2] = [Persona::Tutor, Persona::Operator];

    /// Returns the stable identifier used in URLs and client frames.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tutor => "tutor",
            Self::Operator => "operator",
        }
    }

    /// Returns the system instruction sent upstream at setup time.
    pub fn system_instruction(self) -> &'static str {
        match self {
            Self::Tutor => {
                "You are Laura, a patient voice tutor. Speak in short, friendly sentences, \
                 check the learner's understanding often, and never read long lists aloud. \
                 When a question needs research or progress data, use background_agent_chat \
                 to ask a specialist agent and summarise the answer conversationally."
            }
            Self::Operator => {
                "You are the Cadence operations assistant. Answer staff questions concisely. \
                 Use background_agent_chat to consult specialist agents and admin_task to run \
                 administrative tasks when explicitly asked. Confirm the task name before \
                 running it and report the outcome plainly."
            }
        }
    }

    /// Returns the voice preset requested from providers that support one.
    pub fn voice(self) -> &'static str {
        match self {
            Self::Tutor => "Aoede",
            Self::Operator => "Charon",
        }
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Persona {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tutor" => Ok(Self::Tutor),
            "operator" => Ok(Self::Operator),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Error returned when parsing one of the string-backed enums fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown variant: {0}")]
pub struct UnknownVariant(pub String);

/// The identity admitted by the session authenticator.
///
/// Produced once per connection and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedPrincipal {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
}

impl AuthenticatedPrincipal {
    /// Role strings that grant administrative tool execution.
    pub const ADMIN_ROLES: [&'static str; 3] = ["admin", "administrator", "superadmin"];

    /// Returns `true` if the principal's role denotes an administrator.
    pub fn is_admin(&self) -> bool {
        self.role.as_deref().is_some_and(|role| {
            Self::ADMIN_ROLES
                .iter()
                .any(|admin| role.trim().eq_ignore_ascii_case(admin))
        })
    }
}

/// Upstream generative-AI service a relay session can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Gemini Live (`BidiGenerateContent`).
    Primary,
    /// OpenAI Realtime protocol.
    Secondary,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "gemini-live",
            Self::Secondary => "openai-realtime",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider plus the credential path used to reach it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Primary provider reached with a delegated-identity access token.
    PrimaryOAuth,
    /// Primary provider reached with its pre-shared key.
    PrimaryKey,
    /// Secondary provider (always key based).
    Secondary,
}

impl ProviderKind {
    pub fn provider(self) -> Provider {
        match self {
            Self::PrimaryOAuth | Self::PrimaryKey => Provider::Primary,
            Self::Secondary => Provider::Secondary,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PrimaryOAuth => "primary_oauth",
            Self::PrimaryKey => "primary_key",
            Self::Secondary => "secondary",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audio/text output modality requested from the upstream model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Audio,
    Text,
}

/// A capability the upstream model may call, supplied at setup time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the call arguments.
    pub parameters: Value,
}

/// A tool call recognised in an upstream frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallEnvelope {
    pub name: String,
    /// Opaque structured arguments, passed to the dispatcher as-is.
    pub arguments: Value,
    /// Provider correlation identifier, when the provider uses one.
    pub correlation_id: Option<String>,
}

impl ToolCallEnvelope {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

/// Outcome of one tool dispatch, serialised back upstream by the adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    Value(Value),
    Error(String),
}

impl ToolResult {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Renders the result as a JSON object.
    ///
    /// Non-object success values are wrapped as `{"result": value}` because
    /// both providers require an object in their response envelopes.
    pub fn to_payload(&self) -> Value {
        match self {
            Self::Value(value @ Value::Object(_)) => value.clone(),
            Self::Value(value) => json!({ "result": value }),
            Self::Error(message) => json!({ "error": message }),
        }
    }
}

/// Deployment mode; controls how much credential diagnostics may be logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeMode {
    #[default]
    Development,
    Production,
}

impl RuntimeMode {
    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

impl FromStr for RuntimeMode {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "development" | "dev" | "test" => Ok(Self::Development),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}
