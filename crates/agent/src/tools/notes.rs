//! Note tools: read, list, create, edit, delete, move, rename, create folder

use async_trait::async_trait;
use serde::Deserialize;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tracing::debug;

use super::path_utils::{display_relative, validate_workspace_path};
use super::{BoxError, ParamKind, Params, ToolContext, ToolDefinition, ToolExecutor, ToolParameter, ToolResult};

fn parse_args<T: serde::de::DeserializeOwned>(params: Params) -> Result<T, BoxError> {
    Ok(serde_json::from_value(serde_json::Value::Object(params))?)
}

fn is_markdown(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext.eq_ignore_ascii_case("md"))
}

/// Same directory, new file name. A file keeps its extension when the new
/// name has none.
fn sibling_path(path: &Path, new_name: &str) -> Result<PathBuf, String> {
    let new_name = new_name.trim();
    if new_name.is_empty() || new_name == "." || new_name == ".." {
        return Err(format!("Invalid name: '{}'", new_name));
    }
    if new_name.contains(['/', '\\']) {
        return Err(format!(
            "new_name must be a bare name without folders: '{}'. Use move_note to change folders.",
            new_name
        ));
    }

    let mut target = path.with_file_name(new_name);
    if path.is_file() && target.extension().is_none() {
        if let Some(ext) = path.extension() {
            target.set_extension(ext);
        }
    }
    Ok(target)
}

/// Every `.md` file below `dir`, sorted
pub(crate) async fn collect_markdown_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else if is_markdown(&path) {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Indented tree: directories first, then `.md` files, both by name
pub(crate) fn render_tree<'a>(
    dir: &'a Path,
    indent: String,
    recursive: bool,
    out: &'a mut Vec<String>,
) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let mut dirs = Vec::new();
        let mut notes = Vec::new();

        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if entry.file_type().await?.is_dir() {
                dirs.push((name, entry.path()));
            } else if is_markdown(&entry.path()) {
                notes.push(name);
            }
        }
        dirs.sort();
        notes.sort();

        for (name, path) in dirs {
            out.push(format!("{}📁 {}/", indent, name));
            if recursive {
                render_tree(&path, format!("{}  ", indent), recursive, out).await?;
            }
        }
        for name in notes {
            out.push(format!("{}📄 {}", indent, name));
        }
        Ok(())
    })
}

/// Read one or more notes with line numbers
pub struct ReadNoteTool;

#[derive(Deserialize)]
struct ReadNoteArgs {
    paths: Vec<String>,
}

#[async_trait]
impl ToolExecutor for ReadNoteTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "read_note",
            "Read the full content of one or more notes. Lines are prefixed with their number.",
        )
        .param(ToolParameter::required(
            "paths",
            ParamKind::Array,
            "Note paths relative to the workspace, as a JSON array or a single path",
        ))
        .usage("<read_note>\n<paths>[\"daily/2024-01-01.md\"]</paths>\n</read_note>")
    }

    fn requires_approval(&self) -> bool {
        false
    }

    async fn execute(&self, params: Params, ctx: &ToolContext) -> Result<ToolResult, BoxError> {
        let args: ReadNoteArgs = parse_args(params)?;
        if args.paths.is_empty() {
            return Ok(ToolResult::fail("paths must not be empty"));
        }

        let mut sections = Vec::with_capacity(args.paths.len());
        for relative in &args.paths {
            let body = match validate_workspace_path(relative, &ctx.workspace_path).await {
                Err(e) => format!("Error: {}", e),
                Ok(path) => {
                    debug!("◆ READING NOTE: {:?}", path);
                    match tokio::fs::read_to_string(&path).await {
                        Ok(content) => content
                            .lines()
                            .enumerate()
                            .map(|(i, line)| format!("{} | {}", i + 1, line))
                            .collect::<Vec<_>>()
                            .join("\n"),
                        Err(e) => format!("Error: {}", e),
                    }
                }
            };
            sections.push(format!("=== {} ===\n{}\n=== END ===", relative, body));
        }

        Ok(ToolResult::ok(sections.join("\n\n")))
    }
}

/// Directory listing of notes
pub struct ListNotesTool;

#[derive(Deserialize)]
struct ListNotesArgs {
    #[serde(default)]
    directory: String,
    #[serde(default = "default_recursive")]
    recursive: bool,
}

fn default_recursive() -> bool {
    true
}

#[async_trait]
impl ToolExecutor for ListNotesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "list_notes",
            "List folders and markdown notes in a workspace directory.",
        )
        .param(ToolParameter::optional(
            "directory",
            ParamKind::String,
            "Directory relative to the workspace; empty for the root",
        ))
        .param(ToolParameter::optional(
            "recursive",
            ParamKind::Boolean,
            "Include subdirectories (default true)",
        ))
        .usage("<list_notes>\n<directory></directory>\n</list_notes>")
    }

    fn requires_approval(&self) -> bool {
        false
    }

    async fn execute(&self, params: Params, ctx: &ToolContext) -> Result<ToolResult, BoxError> {
        let args: ListNotesArgs = parse_args(params)?;
        let dir = validate_workspace_path(&args.directory, &ctx.workspace_path).await?;

        if !dir.is_dir() {
            return Ok(ToolResult::fail(format!(
                "Directory not found: {}",
                args.directory
            )));
        }

        let mut lines = Vec::new();
        render_tree(&dir, String::new(), args.recursive, &mut lines).await?;

        let label = if args.directory.trim().is_empty() {
            "/"
        } else {
            args.directory.as_str()
        };
        let listing = if lines.is_empty() {
            "(empty)".to_string()
        } else {
            lines.join("\n")
        };
        Ok(ToolResult::ok(format!("Directory: {}\n\n{}", label, listing)))
    }
}

/// Create a new note
pub struct CreateNoteTool;

#[derive(Deserialize)]
struct CreateNoteArgs {
    path: String,
    content: String,
}

#[async_trait]
impl ToolExecutor for CreateNoteTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "create_note",
            "Create a new markdown note. Fails if the note already exists; missing folders are created.",
        )
        .param(ToolParameter::required(
            "path",
            ParamKind::String,
            "Path of the new note, ending in .md",
        ))
        .param(ToolParameter::required(
            "content",
            ParamKind::String,
            "Full markdown content",
        ))
        .usage("<create_note>\n<path>ideas/new-idea.md</path>\n<content># New idea\n\n...</content>\n</create_note>")
    }

    async fn execute(&self, params: Params, ctx: &ToolContext) -> Result<ToolResult, BoxError> {
        let args: CreateNoteArgs = parse_args(params)?;
        let mut path = validate_workspace_path(&args.path, &ctx.workspace_path).await?;
        if path.extension().is_none() {
            path.set_extension("md");
        }

        if path.exists() {
            return Ok(ToolResult::fail(format!(
                "Note already exists: {}. Use edit_note to change it.",
                args.path
            )));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        debug!("◆ CREATING NOTE: {:?}", path);
        tokio::fs::write(&path, &args.content).await?;

        let root = tokio::fs::canonicalize(&ctx.workspace_path).await?;
        Ok(ToolResult::ok(format!(
            "Created note {} ({} bytes)",
            display_relative(&path, &root),
            args.content.len()
        )))
    }
}

/// Exact search/replace edits on an existing note
pub struct EditNoteTool;

#[derive(Deserialize)]
struct EditNoteArgs {
    path: String,
    edits: Vec<NoteEdit>,
    #[serde(default)]
    new_name: Option<String>,
}

#[derive(Deserialize)]
struct NoteEdit {
    search: String,
    replace: String,
}

/// Apply edits in order. Each replaces the first occurrence of its search
/// text; an edit whose text is not found is reported and skipped.
fn apply_edits(content: &str, edits: &[NoteEdit]) -> (String, Vec<String>, Vec<String>) {
    let mut text = content.replace("\r\n", "\n");
    let mut applied = Vec::new();
    let mut failed = Vec::new();

    for (i, edit) in edits.iter().enumerate() {
        let search = edit.search.replace("\r\n", "\n");
        if search.is_empty() {
            failed.push(format!("Edit {}: empty search text", i + 1));
        } else if text.contains(&search) {
            text = text.replacen(&search, &edit.replace, 1);
            applied.push(format!("Edit {}: applied", i + 1));
        } else {
            failed.push(format!(
                "Edit {}: search text not found; it must match the note exactly",
                i + 1
            ));
        }
    }

    (text, applied, failed)
}

#[async_trait]
impl ToolExecutor for EditNoteTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "edit_note",
            "Change an existing note with exact search/replace edits, applied in order. Read the note first.",
        )
        .param(ToolParameter::required(
            "path",
            ParamKind::String,
            "Note to edit",
        ))
        .param(ToolParameter::required(
            "edits",
            ParamKind::Array,
            "JSON array of {\"search\": ..., \"replace\": ...} objects",
        ))
        .param(ToolParameter::optional(
            "new_name",
            ParamKind::String,
            "New file name without folders; give one when the edit changes what the note is about",
        ))
        .usage("<edit_note>\n<path>todo.md</path>\n<edits>[{\"search\": \"- [ ] ship\", \"replace\": \"- [x] ship\"}]</edits>\n</edit_note>")
    }

    async fn execute(&self, params: Params, ctx: &ToolContext) -> Result<ToolResult, BoxError> {
        let args: EditNoteArgs = parse_args(params)?;
        if args.edits.is_empty() {
            return Ok(ToolResult::fail("edits must not be empty"));
        }

        let path = validate_workspace_path(&args.path, &ctx.workspace_path).await?;
        if !path.is_file() {
            return Ok(ToolResult::fail(format!("Note not found: {}", args.path)));
        }

        let original = tokio::fs::read_to_string(&path).await?;
        let (updated, applied, failed) = apply_edits(&original, &args.edits);

        if applied.is_empty() {
            return Ok(ToolResult::fail(format!(
                "No edits applied to {}:\n{}",
                args.path,
                failed.join("\n")
            )));
        }

        debug!("◆ EDITING NOTE: {:?} ({} EDITS)", path, applied.len());
        tokio::fs::write(&path, &updated).await?;

        let mut summary = vec![format!("Edited {}", args.path)];
        summary.extend(applied);
        if !failed.is_empty() {
            summary.push(format!("Failed: {}", failed.len()));
            summary.extend(failed);
        }

        // the edits are already written, so a failed rename only gets reported
        if let Some(new_name) = args.new_name.as_deref().filter(|n| !n.trim().is_empty()) {
            match sibling_path(&path, new_name) {
                Err(reason) => summary.push(format!("Rename failed: {}", reason)),
                Ok(target) if target.exists() => summary.push(format!(
                    "Rename failed: {} already exists",
                    new_name.trim()
                )),
                Ok(target) => {
                    debug!("◆ RENAMING NOTE: {:?} -> {:?}", path, target);
                    tokio::fs::rename(&path, &target).await?;
                    let root = tokio::fs::canonicalize(&ctx.workspace_path).await?;
                    summary.push(format!("Renamed to {}", display_relative(&target, &root)));
                }
            }
        }
        Ok(ToolResult::ok(summary.join("\n")))
    }
}

/// Delete a note
pub struct DeleteNoteTool;

#[derive(Deserialize)]
struct PathArgs {
    path: String,
}

#[async_trait]
impl ToolExecutor for DeleteNoteTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("delete_note", "Delete a note permanently.")
            .param(ToolParameter::required(
                "path",
                ParamKind::String,
                "Note to delete",
            ))
            .usage("<delete_note>\n<path>scratch.md</path>\n</delete_note>")
    }

    async fn execute(&self, params: Params, ctx: &ToolContext) -> Result<ToolResult, BoxError> {
        let args: PathArgs = parse_args(params)?;
        let path = validate_workspace_path(&args.path, &ctx.workspace_path).await?;

        if !path.is_file() {
            return Ok(ToolResult::fail(format!("Note not found: {}", args.path)));
        }

        debug!("◆ DELETING NOTE: {:?}", path);
        tokio::fs::remove_file(&path).await?;
        Ok(ToolResult::ok(format!("Deleted {}", args.path)))
    }
}

/// Move or rename a note
pub struct MoveNoteTool;

#[derive(Deserialize)]
struct MoveNoteArgs {
    from: String,
    to: String,
}

#[async_trait]
impl ToolExecutor for MoveNoteTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "move_note",
            "Move or rename a note. Fails if the target exists; missing folders are created.",
        )
        .param(ToolParameter::required("from", ParamKind::String, "Current path"))
        .param(ToolParameter::required("to", ParamKind::String, "New path"))
        .usage("<move_note>\n<from>inbox/idea.md</from>\n<to>projects/idea.md</to>\n</move_note>")
    }

    async fn execute(&self, params: Params, ctx: &ToolContext) -> Result<ToolResult, BoxError> {
        let args: MoveNoteArgs = parse_args(params)?;
        let from = validate_workspace_path(&args.from, &ctx.workspace_path).await?;
        let to = validate_workspace_path(&args.to, &ctx.workspace_path).await?;

        if !from.is_file() {
            return Ok(ToolResult::fail(format!("Note not found: {}", args.from)));
        }
        if to.exists() {
            return Ok(ToolResult::fail(format!("Target already exists: {}", args.to)));
        }
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        debug!("◆ MOVING NOTE: {:?} -> {:?}", from, to);
        tokio::fs::rename(&from, &to).await?;
        Ok(ToolResult::ok(format!("Moved {} to {}", args.from, args.to)))
    }
}

/// Rename a note or folder in place
pub struct RenameFileTool;

#[derive(Deserialize)]
struct RenameArgs {
    path: String,
    new_name: String,
}

#[async_trait]
impl ToolExecutor for RenameFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "rename_file",
            "Rename a note or folder within its current folder. Fails if the new name is taken.",
        )
        .param(ToolParameter::required(
            "path",
            ParamKind::String,
            "Note or folder to rename",
        ))
        .param(ToolParameter::required(
            "new_name",
            ParamKind::String,
            "New name without folders",
        ))
        .usage("<rename_file>\n<path>notes/old-name.md</path>\n<new_name>new-name.md</new_name>\n</rename_file>")
    }

    async fn execute(&self, params: Params, ctx: &ToolContext) -> Result<ToolResult, BoxError> {
        let args: RenameArgs = parse_args(params)?;
        let path = validate_workspace_path(&args.path, &ctx.workspace_path).await?;
        let root = tokio::fs::canonicalize(&ctx.workspace_path).await?;

        if !path.exists() {
            return Ok(ToolResult::fail(format!("Not found: {}", args.path)));
        }
        if path == root {
            return Ok(ToolResult::fail("The workspace root cannot be renamed"));
        }
        let target = match sibling_path(&path, &args.new_name) {
            Ok(target) => target,
            Err(reason) => return Ok(ToolResult::fail(reason)),
        };
        if target.exists() {
            return Ok(ToolResult::fail(format!(
                "Target already exists: {}",
                display_relative(&target, &root)
            )));
        }

        debug!("◆ RENAMING: {:?} -> {:?}", path, target);
        tokio::fs::rename(&path, &target).await?;
        Ok(ToolResult::ok(format!(
            "Renamed {} to {}",
            args.path,
            display_relative(&target, &root)
        )))
    }
}

/// Create a folder
pub struct CreateFolderTool;

#[async_trait]
impl ToolExecutor for CreateFolderTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("create_folder", "Create a folder, including missing parents.")
            .param(ToolParameter::required(
                "path",
                ParamKind::String,
                "Folder path relative to the workspace",
            ))
            .usage("<create_folder>\n<path>projects/2024</path>\n</create_folder>")
    }

    async fn execute(&self, params: Params, ctx: &ToolContext) -> Result<ToolResult, BoxError> {
        let args: PathArgs = parse_args(params)?;
        let path = validate_workspace_path(&args.path, &ctx.workspace_path).await?;

        if path.exists() {
            return Ok(ToolResult::fail(format!("Already exists: {}", args.path)));
        }

        debug!("◆ CREATING FOLDER: {:?}", path);
        tokio::fs::create_dir_all(&path).await?;
        Ok(ToolResult::ok(format!("Created folder {}", args.path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edit(search: &str, replace: &str) -> NoteEdit {
        NoteEdit {
            search: search.to_string(),
            replace: replace.to_string(),
        }
    }

    #[test]
    fn test_apply_edits_in_order() {
        let (text, applied, failed) = apply_edits(
            "a b a",
            &[edit("a", "x"), edit("x b", "y"), edit("zzz", "q")],
        );
        assert_eq!(text, "y a");
        assert_eq!(applied.len(), 2);
        assert_eq!(failed.len(), 1);
        assert!(failed[0].starts_with("Edit 3"));
    }

    #[test]
    fn test_apply_edits_normalizes_crlf() {
        let (text, applied, _) = apply_edits("one\r\ntwo\r\n", &[edit("one\r\ntwo", "1\n2")]);
        assert_eq!(text, "1\n2\n");
        assert_eq!(applied.len(), 1);
    }

    #[test]
    fn test_sibling_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let note = dir.path().join("old.md");
        std::fs::write(&note, "x").unwrap();

        assert_eq!(sibling_path(&note, "new").unwrap(), dir.path().join("new.md"));
        assert_eq!(sibling_path(&note, "new.txt").unwrap(), dir.path().join("new.txt"));
        assert_eq!(sibling_path(dir.path(), "renamed").unwrap(), dir.path().with_file_name("renamed"));
        assert!(sibling_path(&note, "sub/new.md").is_err());
        assert!(sibling_path(&note, "..").is_err());
        assert!(sibling_path(&note, "  ").is_err());
    }

    #[test]
    fn test_is_markdown() {
        assert!(is_markdown(Path::new("a/b.md")));
        assert!(is_markdown(Path::new("B.MD")));
        assert!(!is_markdown(Path::new("c.txt")));
    }
}
