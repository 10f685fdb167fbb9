//! Backlinks: notes that point at a note with `[[wikilinks]]`

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use super::notes::collect_markdown_files;
use super::path_utils::display_relative;
use super::{
    BoxError, ParamKind, Params, ToolContext, ToolDefinition, ToolExecutor, ToolParameter,
    ToolResult,
};

const MAX_CONTEXT_CHARS: usize = 150;

/// `[[target]]`, `[[target|alias]]`, `[[target#heading]]`
const WIKILINK: &str = r"\[\[([^\]|#]+)(?:#[^\]|]*)?(?:\|[^\]]*)?\]\]";

/// Lowercased note name: last path segment without `.md`
fn note_key(name: &str) -> String {
    let last = name.trim().rsplit(['/', '\\']).next().unwrap_or_default();
    let stem = last
        .strip_suffix(".md")
        .or_else(|| last.strip_suffix(".MD"))
        .unwrap_or(last);
    stem.trim().to_lowercase()
}

/// List the notes linking to a note
pub struct GetBacklinksTool;

#[derive(Deserialize)]
struct BacklinkArgs {
    note_name: String,
    #[serde(default = "default_include_context")]
    include_context: bool,
}

fn default_include_context() -> bool {
    true
}

#[async_trait]
impl ToolExecutor for GetBacklinksTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "get_backlinks",
            "Find the notes that link to a note with [[wikilinks]], with the line of each link.",
        )
        .param(ToolParameter::required(
            "note_name",
            ParamKind::String,
            "Note name without .md; a path is reduced to its file name",
        ))
        .param(ToolParameter::optional(
            "include_context",
            ParamKind::Boolean,
            "Show the line containing each link (default true)",
        ))
        .usage("<get_backlinks>\n<note_name>project plan</note_name>\n</get_backlinks>")
    }

    fn requires_approval(&self) -> bool {
        false
    }

    async fn execute(&self, params: Params, ctx: &ToolContext) -> Result<ToolResult, BoxError> {
        let args: BacklinkArgs = serde_json::from_value(serde_json::Value::Object(params))?;
        let key = note_key(&args.note_name);
        if key.is_empty() {
            return Ok(ToolResult::fail("note_name must not be empty"));
        }

        let wikilink = Regex::new(WIKILINK)?;
        let root = tokio::fs::canonicalize(&ctx.workspace_path).await?;
        let mut hits = Vec::new();

        debug!("◆ COLLECTING BACKLINKS FOR {:?}", key);
        for file in collect_markdown_files(&root).await? {
            let relative = display_relative(&file, &root);
            if note_key(&relative) == key {
                continue;
            }
            let Ok(content) = tokio::fs::read_to_string(&file).await else {
                continue;
            };

            for (i, line) in content.lines().enumerate() {
                let links_here = wikilink
                    .captures_iter(line)
                    .any(|caps| note_key(&caps[1]) == key);
                if !links_here {
                    continue;
                }

                let mut hit = format!("{}. {} (line {})", hits.len() + 1, relative, i + 1);
                if args.include_context {
                    let line = line.trim();
                    let excerpt: String = line.chars().take(MAX_CONTEXT_CHARS).collect();
                    let ellipsis = if line.chars().count() > MAX_CONTEXT_CHARS { "..." } else { "" };
                    hit.push_str(&format!("\n   Context: {}{}", excerpt, ellipsis));
                }
                hits.push(hit);
            }
        }

        let name = args.note_name.trim().trim_end_matches(".md");
        if hits.is_empty() {
            return Ok(ToolResult::ok(format!("Note \"{}\" has no backlinks.", name)));
        }
        Ok(ToolResult::ok(format!(
            "Note \"{}\" has {} backlinks:\n\n{}",
            name,
            hits.len(),
            hits.join("\n\n")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_note_key() {
        assert_eq!(note_key("Project Plan"), "project plan");
        assert_eq!(note_key("work/Project Plan.md"), "project plan");
        assert_eq!(note_key(" a.MD "), "a");
        assert_eq!(note_key(""), "");
    }

    #[test]
    fn test_wikilink_forms() {
        let re = Regex::new(WIKILINK).unwrap();
        let line = "see [[Plan]], [[work/plan|the plan]] and [[Plan#Goals]] but not [Plan]";
        let targets: Vec<String> = re.captures_iter(line).map(|c| c[1].to_string()).collect();
        assert_eq!(targets, vec!["Plan", "work/plan", "Plan"]);
    }

    fn args(value: serde_json::Value) -> Params {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_backlinks_with_context() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("daily")).unwrap();
        std::fs::write(dir.path().join("plan.md"), "# Plan\nsee [[plan]] itself").unwrap();
        std::fs::write(dir.path().join("daily/monday.md"), "intro\nWorked on [[Plan|the plan]]").unwrap();
        std::fs::write(dir.path().join("other.md"), "nothing to see").unwrap();

        let ctx = ToolContext::new(dir.path());
        let result = GetBacklinksTool
            .execute(args(json!({ "note_name": "plan.md" })), &ctx)
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.content.starts_with("Note \"plan\" has 1 backlinks:"));
        assert!(result.content.contains("1. daily/monday.md (line 2)"));
        assert!(result.content.contains("Context: Worked on [[Plan|the plan]]"));
        assert!(!result.content.contains("plan.md (line"));
    }

    #[tokio::test]
    async fn test_backlinks_without_context_or_links() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.md"), "[[b]]").unwrap();
        let ctx = ToolContext::new(dir.path());

        let result = GetBacklinksTool
            .execute(args(json!({ "note_name": "b", "include_context": false })), &ctx)
            .await
            .unwrap();
        assert_eq!(result.content, "Note \"b\" has 1 backlinks:\n\n1. a.md (line 1)");

        let none = GetBacklinksTool
            .execute(args(json!({ "note_name": "c" })), &ctx)
            .await
            .unwrap();
        assert_eq!(none.content, "Note \"c\" has no backlinks.");
    }
}
