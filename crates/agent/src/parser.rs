//! Model reply parsing and the messages fed back to the model
//!
//! Tool calls are written by the model as XML-like tags:
//!
//! ```text
//! <read_note>
//! <paths>["inbox.md"]</paths>
//! </read_note>
//! ```
//!
//! Parsing is stateless: the same text always yields the same result.

use crate::tools::{Params, ToolCall, ToolResult, COMPLETION_TOOL};
use serde_json::Value;

/// Tags the model uses for commentary or diff wrappers, never tool calls
pub const NON_TOOL_TAGS: [&str; 5] = ["thinking", "description", "original", "modified", "edit"];

/// Longest tool output passed back to the model, in characters
pub const MAX_RESULT_CHARS: usize = 8000;

const SIGNATURE_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedResponse {
    /// The full reply text
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub is_completion: bool,
    /// Well-formed tags dropped because no such tool exists
    pub rejected: Vec<String>,
}

struct Tag<'a> {
    name: &'a str,
    body: &'a str,
    raw: &'a str,
}

/// Next `<name>` at or after `from`, as (tag start, name end).
/// Names are ASCII letters, digits and underscores.
fn find_open_tag(content: &str, from: usize) -> Option<(usize, usize)> {
    let bytes = content.as_bytes();
    let mut pos = from;

    while let Some(offset) = content[pos..].find('<') {
        let start = pos + offset;
        let name_len = bytes[start + 1..]
            .iter()
            .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
            .count();
        let name_end = start + 1 + name_len;
        if name_len > 0 && bytes.get(name_end) == Some(&b'>') {
            return Some((start, name_end));
        }
        // '<' is one byte, so this stays on a char boundary
        pos = start + 1;
    }

    None
}

/// Non-nested `<name>body</name>` pairs, left to right.
///
/// Each opening tag is closed by the first matching closing tag after it;
/// scanning resumes after that closing tag. An opening tag without a close
/// is skipped.
fn scan_tags(content: &str) -> Vec<Tag<'_>> {
    let mut tags = Vec::new();
    let mut pos = 0;

    while let Some((start, name_end)) = find_open_tag(content, pos) {
        let name = &content[start + 1..name_end];
        let body_start = name_end + 1;
        let closing = format!("</{}>", name);

        match content[body_start..].find(&closing) {
            Some(offset) => {
                let body_end = body_start + offset;
                let end = body_end + closing.len();
                tags.push(Tag {
                    name,
                    body: &content[body_start..body_end],
                    raw: &content[start..end],
                });
                pos = end;
            }
            None => pos = start + 1,
        }
    }

    tags
}

/// Parameter tags inside a tool body. Values are trimmed, then read as JSON
/// when they parse as JSON and kept as text otherwise.
fn parse_params(body: &str) -> Params {
    let mut params = Params::new();
    for tag in scan_tags(body) {
        let text = tag.body.trim();
        let value = serde_json::from_str::<Value>(text)
            .unwrap_or_else(|_| Value::String(text.to_string()));
        params.insert(tag.name.to_string(), value);
    }
    params
}

fn is_non_tool_tag(name: &str) -> bool {
    NON_TOOL_TAGS.iter().any(|t| t.eq_ignore_ascii_case(name))
}

/// Parse a reply accepting any tag name as a tool
pub fn parse_response(content: &str) -> ParsedResponse {
    parse_response_with(content, |_| true)
}

/// Parse a reply, dropping tags whose name `is_known` rejects.
///
/// `attempt_completion` is always accepted and always emitted, even without
/// parameters. Any other tag needs at least one parameter to count as a call.
pub fn parse_response_with(content: &str, is_known: impl Fn(&str) -> bool) -> ParsedResponse {
    let mut parsed = ParsedResponse {
        text: content.to_string(),
        ..Default::default()
    };

    for tag in scan_tags(content) {
        if is_non_tool_tag(tag.name) {
            continue;
        }

        let params = parse_params(tag.body);
        if tag.name == COMPLETION_TOOL {
            parsed.is_completion = true;
        } else if params.is_empty() {
            continue;
        } else if !is_known(tag.name) {
            parsed.rejected.push(tag.name.to_string());
            continue;
        }

        parsed
            .tool_calls
            .push(ToolCall::new(tag.name, params).with_raw(tag.raw));
    }

    parsed
}

/// Wrap a tool result for the conversation history.
///
/// The `params` attribute holds the start of the raw call so results of
/// repeated calls to the same tool can be told apart.
pub fn format_tool_result(call: &ToolCall, result: &ToolResult) -> String {
    let tag = if result.success {
        "tool_result"
    } else {
        "tool_error"
    };
    let body = if result.success {
        result.content.as_str()
    } else {
        result.error.as_deref().unwrap_or(&result.content)
    };

    let total = body.chars().count();
    let content = if total > MAX_RESULT_CHARS {
        let head: String = body.chars().take(MAX_RESULT_CHARS).collect();
        format!(
            "{}\n\n[Output truncated: {} characters total]",
            head, total
        )
    } else {
        body.to_string()
    };

    let signature: String = call
        .raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(SIGNATURE_CHARS)
        .collect::<String>()
        .replace('"', "&quot;");

    format!(
        "<{tag} name=\"{}\" params=\"{}\">\n{}\n</{tag}>",
        call.name, signature, content
    )
}

/// Corrective prompt for a reply with neither a tool call nor completion
pub fn no_tool_used_prompt() -> String {
    "[ERROR] You did not use a tool in your previous response. \
Every response must call exactly the tools you need using the XML format, for example:\n\n\
<list_notes>\n<directory></directory>\n</list_notes>\n\n\
When the task is finished, call:\n\n\
<attempt_completion>\n<result>What was done</result>\n</attempt_completion>\n\n\
Retry now with a tool call."
        .to_string()
}

/// Notice for tags that named tools which do not exist; they were not run
pub fn ignored_tools_message(names: &[String]) -> String {
    format!(
        "[ERROR] These tools do not exist: {}. They were not run. Use only the tools listed in the system prompt.",
        names.join(", ")
    )
}

/// Corrective prompt when the reply only named tools that do not exist
pub fn unknown_tools_prompt(names: &[String]) -> String {
    format!("{}\n\n{}", ignored_tools_message(names), no_tool_used_prompt())
}

/// Synthetic user message for a tool the user declined
pub fn rejected_tool_message(name: &str) -> String {
    format!(
        "User rejected tool call: {}. Do not retry it; choose another approach or finish with attempt_completion.",
        name
    )
}

/// Retry prompt after a failed turn
pub fn error_retry_prompt(error: &str) -> String {
    format!(
        "[ERROR] The system hit an error: {}\n\nAnalyze the problem inside <thinking> tags, then continue with a tool call.",
        error
    )
}
