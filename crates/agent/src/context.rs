//! Per-task context and the message window sent to the model

use std::path::{Path, PathBuf};
use tracing::debug;

use notewright_provider::{Message, Role};

use crate::modes::Mode;
use crate::parser::parse_response;
use crate::tools::notes::render_tree;
use crate::tools::ToolContext;

/// Longest active-note excerpt embedded in the task message, in characters
pub const MAX_NOTE_CHARS: usize = 15_000;

/// Default number of messages sent per model call
pub const DEFAULT_CONTEXT_MESSAGES: usize = 40;

const MAX_TREE_LINES: usize = 200;
const MAX_SUMMARY_PATHS: usize = 5;

/// Caller-supplied facts about the task. Never changed by the agent.
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    pub workspace_path: PathBuf,
    /// Workspace-relative path of the note open in the editor
    pub active_note: Option<String>,
    pub active_note_content: Option<String>,
    pub file_tree: Option<String>,
    pub recent_notes: Vec<String>,
    /// Overrides the loop's mode for this task
    pub mode: Option<Mode>,
}

impl TaskContext {
    pub fn new(workspace_path: impl Into<PathBuf>) -> Self {
        Self {
            workspace_path: workspace_path.into(),
            ..Default::default()
        }
    }

    pub fn with_active_note(mut self, path: impl Into<String>, content: Option<String>) -> Self {
        self.active_note = Some(path.into());
        self.active_note_content = content;
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_file_tree(mut self, tree: impl Into<String>) -> Self {
        self.file_tree = Some(tree.into());
        self
    }

    pub fn with_recent_notes(mut self, notes: Vec<String>) -> Self {
        self.recent_notes = notes;
        self
    }

    /// The subset handed to tool executors
    pub fn tool_context(&self) -> ToolContext {
        ToolContext {
            workspace_path: self.workspace_path.clone(),
            active_note_path: self.active_note.clone(),
        }
    }
}

/// Outline of the workspace for the system prompt, capped in length
pub async fn scan_file_tree(workspace: &Path) -> std::io::Result<String> {
    let mut lines = Vec::new();
    render_tree(workspace, String::new(), true, &mut lines).await?;

    let total = lines.len();
    if total > MAX_TREE_LINES {
        lines.truncate(MAX_TREE_LINES);
        lines.push(format!("... ({} more entries)", total - MAX_TREE_LINES));
    }
    Ok(lines.join("\n"))
}

fn truncate_chars(text: &str, max: usize) -> Option<String> {
    text.char_indices()
        .nth(max)
        .map(|(byte_index, _)| text[..byte_index].to_string())
}

/// First user message of a task: the instruction plus the open note
pub fn build_user_content(instruction: &str, ctx: &TaskContext) -> String {
    let mut content = format!("<task>\n{}\n</task>", instruction);

    if let (Some(path), Some(note)) = (&ctx.active_note, &ctx.active_note_content) {
        let body = match truncate_chars(note, MAX_NOTE_CHARS) {
            Some(head) => format!("{}\n...(note truncated)", head),
            None => note.clone(),
        };
        content.push_str(&format!(
            "\n\n<current_note path=\"{}\">\n{}\n</current_note>",
            path, body
        ));
    }

    content
}

/// Tool activity in messages that fell out of the window, one line per tool
fn summarize_truncated(messages: &[Message]) -> String {
    let mut seen: Vec<(String, Vec<String>)> = Vec::new();

    for message in messages.iter().filter(|m| m.role == Role::Assistant) {
        for call in parse_response(&message.content).tool_calls {
            let index = match seen.iter().position(|(name, _)| *name == call.name) {
                Some(i) => i,
                None => {
                    seen.push((call.name.clone(), Vec::new()));
                    seen.len() - 1
                }
            };

            let targets = ["path", "paths", "directory", "from", "to"]
                .iter()
                .filter_map(|key| call.params.get(*key))
                .flat_map(|value| match value {
                    serde_json::Value::Array(items) => items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect::<Vec<String>>(),
                    serde_json::Value::String(s) if !s.is_empty() => vec![s.clone()],
                    _ => Vec::new(),
                });

            let paths = &mut seen[index].1;
            for target in targets {
                if !paths.contains(&target) {
                    paths.push(target);
                }
            }
        }
    }

    seen.into_iter()
        .map(|(name, paths)| {
            if paths.is_empty() {
                format!("- {}: called", name)
            } else if paths.len() > MAX_SUMMARY_PATHS {
                format!(
                    "- {}: {} and {} more",
                    name,
                    paths[..MAX_SUMMARY_PATHS].join(", "),
                    paths.len() - MAX_SUMMARY_PATHS
                )
            } else {
                format!("- {}: {}", name, paths.join(", "))
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Sliding window over the history for one model request.
///
/// Keeps the system message, the task message and the newest
/// `max_messages - 2` messages. Tool calls from the dropped middle are
/// summarized into the system message so the model does not repeat them.
/// The stored history is never trimmed.
pub fn trim_history(messages: &[Message], max_messages: usize) -> Vec<Message> {
    if messages.len() <= max_messages || max_messages < 3 {
        return messages.to_vec();
    }

    let keep = max_messages - 2;
    let cut = messages.len() - keep;
    let dropped = &messages[2..cut];
    let summary = summarize_truncated(dropped);

    debug!(
        "◆ CONTEXT TRIMMED: {} -> {} MESSAGES",
        messages.len(),
        max_messages
    );

    let mut system = messages[0].clone();
    if system.role == Role::System && !summary.is_empty() {
        system.content = format!(
            "{}\n\n====\n\n[EARLIER ACTIONS - already done, do not repeat]\n{}",
            system.content, summary
        );
    }

    let mut window = Vec::with_capacity(max_messages);
    window.push(system);
    window.push(messages[1].clone());
    window.extend_from_slice(&messages[cut..]);
    window
}
