use thiserror::Error;

/// Why a tool call produced an error result.
///
/// None of these end the session; each is reported back upstream so the
/// model can recover conversationally.
#[derive(Debug, Error)]
pub enum ToolDispatchError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("forbidden: administrator role required for task {task}")]
    Forbidden { task: String },

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("delegate service failed: {0}")]
    Service(String),
}

impl From<reqwest::Error> for ToolDispatchError {
    fn from(e: reqwest::Error) -> Self {
        // Drop the URL; internal service addresses do not belong in model context.
        Self::Service(e.without_url().to_string())
    }
}
