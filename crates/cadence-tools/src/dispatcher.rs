//! Routing recognised tool calls to internal services.

use crate::catalogue::{ADMIN_TASK, BACKGROUND_AGENT_CHAT};
use crate::delegate::{AdminTaskExecutor, ChatDelegate, ChatRequest};
use crate::error::ToolDispatchError;
use cadence_types::{AuthenticatedPrincipal, ToolCallEnvelope, ToolResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Executes tool calls on behalf of an authenticated principal.
///
/// Shared by every session; holds no per-session state.
pub struct ToolDispatcher {
    delegates: HashMap<String, Arc<dyn ChatDelegate>>,
    admin: Arc<dyn AdminTaskExecutor>,
}

impl ToolDispatcher {
    pub fn new(admin: Arc<dyn AdminTaskExecutor>) -> Self {
        Self {
            delegates: HashMap::new(),
            admin,
        }
    }

    /// Registers the chat delegate reachable as `agent`.
    pub fn with_delegate(mut self, agent: impl Into<String>, delegate: Arc<dyn ChatDelegate>) -> Self {
        self.delegates.insert(agent.into(), delegate);
        self
    }

    /// Dispatches one call. Never fails; errors become [`ToolResult::Error`].
    pub async fn dispatch(
        &self,
        principal: &AuthenticatedPrincipal,
        session_id: &str,
        call: &ToolCallEnvelope,
    ) -> ToolResult {
        match self.try_dispatch(principal, call).await {
            Ok(value) => {
                tracing::info!(session_id, principal_id = %principal.id, tool = %call.name, "tool call completed");
                ToolResult::Value(value)
            }
            Err(e) => {
                tracing::info!(session_id, principal_id = %principal.id, tool = %call.name, error = %e, "tool call failed");
                ToolResult::Error(e.to_string())
            }
        }
    }

    async fn try_dispatch(
        &self,
        principal: &AuthenticatedPrincipal,
        call: &ToolCallEnvelope,
    ) -> Result<Value, ToolDispatchError> {
        match call.name.as_str() {
            BACKGROUND_AGENT_CHAT => self.background_agent_chat(&call.arguments).await,
            ADMIN_TASK => self.admin_task(principal, &call.arguments).await,
            other => Err(ToolDispatchError::UnknownTool(other.to_string())),
        }
    }

    async fn background_agent_chat(&self, args: &Value) -> Result<Value, ToolDispatchError> {
        let agent = string_arg(args, "agent")?;
        let delegate = self
            .delegates
            .get(agent)
            .ok_or_else(|| ToolDispatchError::UnknownAgent(agent.to_string()))?;

        let request = ChatRequest {
            message: string_arg(args, "message")?.to_string(),
            session_id: args
                .get("sessionId")
                .or_else(|| args.get("session_id"))
                .and_then(Value::as_str)
                .map(str::to_string),
            context: args.get("context").filter(|c| !c.is_null()).cloned(),
        };
        delegate.chat(request).await
    }

    async fn admin_task(&self, principal: &AuthenticatedPrincipal, args: &Value) -> Result<Value, ToolDispatchError> {
        if !principal.is_admin() {
            let task = args.get("task").and_then(Value::as_str).unwrap_or("-");
            tracing::warn!(
                principal_id = %principal.id,
                email = principal.email.as_deref().unwrap_or("-"),
                role = principal.role.as_deref().unwrap_or("-"),
                task,
                "admin task denied"
            );
            return Err(ToolDispatchError::Forbidden { task: task.to_string() });
        }
        let task = string_arg(args, "task")?;
        let parameters = args.get("parameters").filter(|p| !p.is_null()).cloned();
        self.admin.execute(task, parameters).await
    }
}

fn string_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolDispatchError> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolDispatchError::InvalidArguments(format!("missing string field `{key}`")))
}
