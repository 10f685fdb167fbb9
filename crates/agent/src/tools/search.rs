//! Full-text search over notes

use async_trait::async_trait;
use regex::RegexBuilder;
use serde::Deserialize;
use tracing::debug;

use super::notes::collect_markdown_files;
use super::path_utils::{display_relative, validate_workspace_path};
use super::{
    BoxError, ParamKind, Params, ToolContext, ToolDefinition, ToolExecutor, ToolParameter,
    ToolResult,
};

const DEFAULT_LIMIT: usize = 50;
const MAX_LINE_CHARS: usize = 200;

/// Line-level search across every note, plain text or regex
pub struct GrepSearchTool;

#[derive(Deserialize)]
struct GrepArgs {
    query: String,
    #[serde(default)]
    directory: String,
    #[serde(default)]
    regex: bool,
    #[serde(default)]
    case_sensitive: bool,
    limit: Option<usize>,
}

#[async_trait]
impl ToolExecutor for GrepSearchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "grep_search",
            "Search the text of all notes line by line. Returns matching lines with their note path and line number.",
        )
        .param(ToolParameter::required("query", ParamKind::String, "Text or pattern to find"))
        .param(ToolParameter::optional(
            "directory",
            ParamKind::String,
            "Only search below this directory",
        ))
        .param(ToolParameter::optional(
            "regex",
            ParamKind::Boolean,
            "Treat query as a regular expression (default false)",
        ))
        .param(ToolParameter::optional(
            "case_sensitive",
            ParamKind::Boolean,
            "Match case (default false)",
        ))
        .param(ToolParameter::optional(
            "limit",
            ParamKind::Number,
            "Maximum number of matches (default 50)",
        ))
        .usage("<grep_search>\n<query>TODO</query>\n<case_sensitive>true</case_sensitive>\n</grep_search>")
    }

    fn requires_approval(&self) -> bool {
        false
    }

    async fn execute(&self, params: Params, ctx: &ToolContext) -> Result<ToolResult, BoxError> {
        let args: GrepArgs = serde_json::from_value(serde_json::Value::Object(params))?;
        if args.query.is_empty() {
            return Ok(ToolResult::fail("query must not be empty"));
        }

        let pattern = if args.regex {
            args.query.clone()
        } else {
            regex::escape(&args.query)
        };
        let matcher = match RegexBuilder::new(&pattern)
            .case_insensitive(!args.case_sensitive)
            .build()
        {
            Ok(re) => re,
            Err(e) => return Ok(ToolResult::fail(format!("Invalid regex: {}", e))),
        };

        let root = tokio::fs::canonicalize(&ctx.workspace_path).await?;
        let scope = validate_workspace_path(&args.directory, &root).await?;
        if !scope.is_dir() {
            return Ok(ToolResult::fail(format!("Directory not found: {}", args.directory)));
        }

        let limit = args.limit.unwrap_or(DEFAULT_LIMIT).max(1);
        let mut hits = Vec::new();

        debug!("◆ SEARCHING NOTES FOR {:?}", pattern);
        'files: for file in collect_markdown_files(&scope).await? {
            // unreadable or non-UTF-8 notes are skipped
            let Ok(content) = tokio::fs::read_to_string(&file).await else {
                continue;
            };
            let relative = display_relative(&file, &root);
            for (i, line) in content.lines().enumerate() {
                if hits.len() >= limit {
                    break 'files;
                }
                if matcher.is_match(line) {
                    let snippet: String = line.trim().chars().take(MAX_LINE_CHARS).collect();
                    hits.push(format!("{}. {}:{}\n   {}", hits.len() + 1, relative, i + 1, snippet));
                }
            }
        }

        if hits.is_empty() {
            return Ok(ToolResult::ok(format!("No matches for \"{}\"", args.query)));
        }

        let mut content = format!("Found {} matches:\n\n{}", hits.len(), hits.join("\n\n"));
        if hits.len() >= limit {
            content.push_str(&format!("\n\n(Results truncated, showing first {})", limit));
        }
        Ok(ToolResult::ok(content))
    }
}
