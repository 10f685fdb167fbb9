//! Tool calls, executors and the registry that dispatches them

pub mod completion;
pub mod links;
pub mod notes;
pub mod path_utils;
pub mod schema;
pub mod search;

pub use completion::AttemptCompletionTool;
pub use links::GetBacklinksTool;
pub use notes::{
    CreateFolderTool, CreateNoteTool, DeleteNoteTool, EditNoteTool, ListNotesTool, MoveNoteTool,
    ReadNoteTool, RenameFileTool,
};
pub use schema::{ParamKind, ToolDefinition, ToolParameter};
pub use search::GrepSearchTool;

use crate::AgentError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub type Params = Map<String, Value>;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Name of the tool that ends a task
pub const COMPLETION_TOOL: &str = "attempt_completion";

/// Default per-call execution limit
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// A tool invocation extracted from model output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub params: Params,
    /// The tagged text the call was parsed from
    pub raw: String,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, params: Params) -> Self {
        Self {
            name: name.into(),
            params,
            raw: String::new(),
        }
    }

    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = raw.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            error: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: String::new(),
            error: Some(error.into()),
        }
    }
}

/// What an executor is allowed to know about the task
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolContext {
    pub workspace_path: PathBuf,
    pub active_note_path: Option<String>,
}

impl ToolContext {
    pub fn new(workspace_path: impl Into<PathBuf>) -> Self {
        Self {
            workspace_path: workspace_path.into(),
            active_note_path: None,
        }
    }
}

/// A tool the model can call
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// Ask the user before running; the safe default is yes
    fn requires_approval(&self) -> bool {
        true
    }

    async fn execute(&self, params: Params, ctx: &ToolContext) -> Result<ToolResult, BoxError>;
}

/// Name → executor map
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolExecutor>>,
    timeout: Duration,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Registry holding every note tool plus `attempt_completion`
    pub fn with_note_tools() -> Self {
        let mut registry = Self::new();
        register_default_tools(&mut registry);
        registry
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Add a tool, replacing any tool of the same name
    pub fn register<T: ToolExecutor + 'static>(&mut self, tool: T) {
        let name = tool.definition().name;
        if self.tools.insert(name.clone(), Arc::new(tool)).is_some() {
            debug!("◆ TOOL REPLACED: {}", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolExecutor>> {
        self.tools.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Catalog entries sorted by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Unknown tools require approval
    pub fn requires_approval(&self, name: &str) -> bool {
        self.tools
            .get(name)
            .map(|t| t.requires_approval())
            .unwrap_or(true)
    }

    /// Validate and normalize a parsed call against its tool's definition
    pub fn prepare(&self, call: &ToolCall) -> Result<ToolCall, String> {
        match self.tools.get(&call.name) {
            Some(tool) => tool.definition().validate(call),
            None => Err(AgentError::ToolNotFound(call.name.clone()).to_string()),
        }
    }

    /// Run a tool. Never fails: unknown names, executor errors, panics and
    /// timeouts all come back as failure results.
    pub async fn execute(&self, name: &str, params: Params, ctx: &ToolContext) -> ToolResult {
        let Some(tool) = self.get(name) else {
            warn!("◆ TOOL NOT FOUND: {}", name);
            return ToolResult::fail(AgentError::ToolNotFound(name.to_string()).to_string());
        };

        let ctx = ctx.clone();
        let handle = tokio::spawn(async move { tool.execute(params, &ctx).await });

        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(e))) => {
                warn!("◆ TOOL {} FAILED: {}", name, e);
                ToolResult::fail(AgentError::ToolExecution(e.to_string()).to_string())
            }
            Ok(Err(join_error)) => {
                let reason = if join_error.is_panic() {
                    crate::panic_message(join_error.into_panic().as_ref())
                } else {
                    join_error.to_string()
                };
                warn!("◆ TOOL {} CRASHED: {}", name, reason);
                ToolResult::fail(AgentError::ToolExecution(reason).to_string())
            }
            Err(_) => {
                warn!("◆ TOOL {} TIMED OUT AFTER {:?}", name, self.timeout);
                ToolResult::fail(format!(
                    "Tool '{}' timed out after {} seconds",
                    name,
                    self.timeout.as_secs()
                ))
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Register the note tools and `attempt_completion`
pub fn register_default_tools(registry: &mut ToolRegistry) {
    registry.register(ReadNoteTool);
    registry.register(ListNotesTool);
    registry.register(GrepSearchTool);
    registry.register(GetBacklinksTool);
    registry.register(CreateNoteTool);
    registry.register(EditNoteTool);
    registry.register(DeleteNoteTool);
    registry.register(MoveNoteTool);
    registry.register(RenameFileTool);
    registry.register(CreateFolderTool);
    registry.register(AttemptCompletionTool);
}
