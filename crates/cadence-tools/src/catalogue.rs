//! Static tool declarations per persona.

use cadence_types::{Persona, ToolDeclaration};
use serde_json::json;

pub const BACKGROUND_AGENT_CHAT: &str = "background_agent_chat";
pub const ADMIN_TASK: &str = "admin_task";

/// Agent identifiers accepted by `background_agent_chat`.
pub const AGENTS: [&str; 2] = ["laura-oracle", "laura-coach"];

fn background_agent_chat() -> ToolDeclaration {
    ToolDeclaration {
        name: BACKGROUND_AGENT_CHAT.to_string(),
        description: "Ask a specialist background agent a question and get its reply. \
                      Use laura-oracle for research and factual lookups, laura-coach for \
                      learner progress and study plans."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "agent": { "type": "string", "enum": AGENTS },
                "message": { "type": "string", "description": "The question for the agent." },
                "sessionId": { "type": "string", "description": "Conversation to continue, if any." },
                "context": { "type": "object", "description": "Extra structured context." }
            },
            "required": ["agent", "message"]
        }),
    }
}

fn admin_task() -> ToolDeclaration {
    ToolDeclaration {
        name: ADMIN_TASK.to_string(),
        description: "Run a named administrative task. Only available to administrators."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "task": { "type": "string", "description": "Task name." },
                "parameters": { "type": "object", "description": "Task parameters." }
            },
            "required": ["task"]
        }),
    }
}

/// Tools declared upstream at setup for `persona`.
pub fn declarations_for(persona: Persona) -> Vec<ToolDeclaration> {
    match persona {
        Persona::Tutor => vec![background_agent_chat()],
        Persona::Operator => vec![background_agent_chat(), admin_task()],
    }
}
