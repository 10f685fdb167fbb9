//! The completion marker tool

use async_trait::async_trait;
use serde_json::Value;

use super::{
    BoxError, ParamKind, Params, ToolContext, ToolDefinition, ToolExecutor, ToolParameter,
    ToolResult, COMPLETION_TOOL,
};

/// Ends the task and carries the final answer for the user
pub struct AttemptCompletionTool;

#[async_trait]
impl ToolExecutor for AttemptCompletionTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            COMPLETION_TOOL,
            "Finish the task and present the result to the user. Only use it once the work is done.",
        )
        .param(ToolParameter::required(
            "result",
            ParamKind::String,
            "Summary of what was done, or the answer to the user's question",
        ))
        .usage("<attempt_completion>\n<result>Created the weekly summary in reviews/week-12.md</result>\n</attempt_completion>")
    }

    fn requires_approval(&self) -> bool {
        false
    }

    async fn execute(&self, params: Params, _ctx: &ToolContext) -> Result<ToolResult, BoxError> {
        match params.get("result").and_then(Value::as_str).map(str::trim) {
            Some(result) if !result.is_empty() => {
                Ok(ToolResult::ok(format!("Task completed:\n{}", result)))
            }
            _ => Ok(ToolResult::fail("attempt_completion requires a non-empty result")),
        }
    }
}
