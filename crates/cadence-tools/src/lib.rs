//! Tool calls requested by the upstream model mid-conversation.
//!
//! [`catalogue`] declares which tools each persona exposes at setup time.
//! [`ToolDispatcher`] executes a recognised [`cadence_types::ToolCallEnvelope`]
//! against the internal collaborators in [`delegate`], enforcing the admin
//! role check for privileged tasks. Every outcome, including denials and
//! unknown tools, comes back as a [`cadence_types::ToolResult`] so the session
//! carries on.

pub mod catalogue;
pub mod delegate;
pub mod dispatcher;
pub mod error;

pub use catalogue::{declarations_for, ADMIN_TASK, AGENTS, BACKGROUND_AGENT_CHAT};
pub use delegate::{AdminTaskExecutor, ChatDelegate, ChatRequest, HttpAdminExecutor, HttpChatDelegate, Unconfigured};
pub use dispatcher::ToolDispatcher;
pub use error::ToolDispatchError;
