//! Agent task loop for a note workspace
//!
//! Drives a bounded conversation with a language model, turns the model's
//! XML-tagged replies into tool calls, gates risky tools behind user
//! approval and stops on completion, error or cancellation.

use std::any::Any;
use thiserror::Error;

pub mod context;
pub mod events;
pub mod loop_agent;
pub mod modes;
pub mod parser;
pub mod prompt;
pub mod state;
pub mod tools;

pub use context::{build_user_content, trim_history, TaskContext};
pub use events::{
    AgentEvent, ErrorRaised, EventKind, EventPayload, MessageAdded, StatusChanged, Subscription,
    ToolCallPending,
};
pub use loop_agent::{AgentLoop, AgentSettings};
pub use modes::{Mode, ModeSlug};
pub use parser::{format_tool_result, parse_response, parse_response_with, ParsedResponse};
pub use prompt::PromptBuilder;
pub use state::{AgentState, AgentStatus, StateManager};
pub use tools::{ToolCall, ToolContext, ToolDefinition, ToolExecutor, ToolRegistry, ToolResult};

/// Agent errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("◆ TASK CANCELLED")]
    Cancelled,

    #[error("◆ MODEL CALL FAILED: {0}")]
    Provider(#[from] notewright_provider::ProviderError),

    #[error("◆ TOOL NOT FOUND: {0}")]
    ToolNotFound(String),

    #[error("◆ TOOL FAILED: {0}")]
    ToolExecution(String),

    #[error("◆ NO TOOL USED IN {0} CONSECUTIVE RESPONSES")]
    TooManyErrors(u32),
}

pub type Result<T> = std::result::Result<T, AgentError>;

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
