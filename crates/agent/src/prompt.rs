//! System prompt assembly

use chrono::Local;

use crate::context::TaskContext;
use crate::modes::{Mode, ModeSlug};
use crate::tools::{ToolDefinition, COMPLETION_TOOL};

const SECTION_BREAK: &str = "====";

/// Builds the system prompt for a mode from the registry's tool catalog
pub struct PromptBuilder {
    mode: Mode,
    catalog: Vec<ToolDefinition>,
}

impl PromptBuilder {
    pub fn new(catalog: Vec<ToolDefinition>) -> Self {
        Self {
            mode: Mode::default(),
            catalog,
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    /// Tools the mode allows, with `attempt_completion` always last
    pub fn tools_for(&self, mode: &Mode) -> Vec<&ToolDefinition> {
        let mut tools: Vec<&ToolDefinition> = self
            .catalog
            .iter()
            .filter(|t| t.name != COMPLETION_TOOL && mode.allows(&t.name))
            .collect();
        if let Some(completion) = self.catalog.iter().find(|t| t.name == COMPLETION_TOOL) {
            tools.push(completion);
        }
        tools
    }

    pub fn build(&self, ctx: &TaskContext) -> String {
        let mode = ctx.mode.as_ref().unwrap_or(&self.mode);
        let tools = self.tools_for(mode);

        [
            role_section(mode),
            tool_use_section(&tools),
            catalog_section(&tools),
            capabilities_section(),
            rules_section(mode, ctx),
            context_section(ctx),
            objective_section(mode),
        ]
        .join("\n\n")
    }
}

fn role_section(mode: &Mode) -> String {
    format!(
        "You are Notewright, an assistant that works inside the user's markdown note library.\n\n{}",
        mode.role_definition
    )
}

fn tool_use_section(tools: &[&ToolDefinition]) -> String {
    let names: Vec<&str> = tools
        .iter()
        .map(|t| t.name.as_str())
        .filter(|name| *name != COMPLETION_TOOL)
        .collect();

    format!(
        "{SECTION_BREAK}\n\nTOOL USE\n\n\
You act only through tools. Call a tool by writing its name as an XML tag with one child tag per parameter:\n\n\
<tool_name>\n<parameter_name>value</parameter_name>\n</tool_name>\n\n\
Arrays and objects are written as JSON inside the parameter tag. \
You may call several tools in one response; they run in order. \
After each call you receive a <tool_result> or <tool_error> message. \
Think inside <thinking> tags before acting if it helps.\n\n\
Valid tool names: {}",
        names.join(", ")
    )
}

fn catalog_section(tools: &[&ToolDefinition]) -> String {
    let entries: Vec<String> = tools.iter().map(|t| t.render()).collect();
    format!("{SECTION_BREAK}\n\nTOOLS\n\n{}", entries.join("\n"))
}

fn capabilities_section() -> String {
    format!(
        "{SECTION_BREAK}\n\nCAPABILITIES\n\n\
- You can read, search and list the notes in the workspace.\n\
- Depending on the mode you can create, edit, move and delete notes and folders.\n\
- Changes to the workspace may need the user's approval; a rejected call is not executed.\n\
- You cannot run programs or reach the network."
    )
}

fn rules_section(mode: &Mode, ctx: &TaskContext) -> String {
    let mut rules = format!(
        "{SECTION_BREAK}\n\nRULES\n\n\
- Workspace root: {}. All paths are relative to it.\n\
- Read a note before editing it; edit_note search text must match the note exactly.\n\
- Prefer editing an existing note over creating a near-duplicate.\n\
- Every response must contain a tool call.\n\
- Always finish with attempt_completion, including when you only answer a question.",
        ctx.workspace_path.display()
    );

    match mode.slug {
        ModeSlug::Writer => rules.push_str(
            "\n- Put new notes in a sensible folder and give them a clear title heading.",
        ),
        ModeSlug::Organizer => rules.push_str(
            "\n- List the affected folders before moving or deleting anything, and never delete a note you have not read.",
        ),
        ModeSlug::Editor | ModeSlug::Researcher => {}
    }
    rules
}

fn context_section(ctx: &TaskContext) -> String {
    let mut section = format!(
        "{SECTION_BREAK}\n\nCONTEXT\n\n\
Current time: {}\n\
Workspace: {}\n\
Active note: {}",
        Local::now().format("%Y-%m-%d %H:%M (%A)"),
        ctx.workspace_path.display(),
        ctx.active_note.as_deref().unwrap_or("none")
    );

    if let Some(tree) = ctx.file_tree.as_deref().filter(|t| !t.is_empty()) {
        section.push_str(&format!("\nFile tree:\n{}", tree));
    }
    if !ctx.recent_notes.is_empty() {
        let recent: Vec<String> = ctx.recent_notes.iter().map(|n| format!("- {}", n)).collect();
        section.push_str(&format!("\nRecent notes:\n{}", recent.join("\n")));
    }
    section
}

fn objective_section(mode: &Mode) -> String {
    format!(
        "{SECTION_BREAK}\n\nOBJECTIVE\n\n\
Mode: {}\n\
1. For a task that changes notes, work step by step with tools until it is done, then call attempt_completion.\n\
2. For a question, gather what you need with the read-only tools and give the answer in attempt_completion.",
        mode.name
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;

    fn builder() -> PromptBuilder {
        PromptBuilder::new(ToolRegistry::with_note_tools().definitions())
    }

    #[test]
    fn test_sections_in_order() {
        let prompt = builder().build(&TaskContext::new("/notes"));
        let positions: Vec<usize> = ["TOOL USE", "TOOLS\n", "CAPABILITIES", "RULES", "CONTEXT", "OBJECTIVE"]
            .iter()
            .map(|s| prompt.find(s).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(prompt.starts_with("You are Notewright"));
        assert!(prompt.contains("Workspace root: /notes"));
    }

    #[test]
    fn test_catalog_follows_mode() {
        let builder = builder();
        let researcher = Mode::get(ModeSlug::Researcher);
        let names: Vec<&str> = builder
            .tools_for(&researcher)
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(
            names,
            vec!["get_backlinks", "grep_search", "list_notes", "read_note", COMPLETION_TOOL]
        );
    }

    #[test]
    fn test_context_mode_overrides_builder_mode() {
        let builder = builder();
        let prompt = builder.build(&TaskContext::new("/n").with_mode(Mode::get(ModeSlug::Organizer)));
        assert!(prompt.contains("## move_note"));
        assert!(prompt.contains("Mode: Organizer"));
        assert!(!prompt.contains("## edit_note"));
    }

    #[test]
    fn test_set_mode() {
        let mut builder = builder();
        builder.set_mode(Mode::get(ModeSlug::Writer));
        let prompt = builder.build(&TaskContext::new("/n"));
        assert!(prompt.contains("## create_note"));
        assert!(prompt.contains("clear title heading"));
    }

    #[test]
    fn test_context_facts() {
        let ctx = TaskContext::new("/n")
            .with_active_note("inbox.md", None)
            .with_file_tree("📄 inbox.md")
            .with_recent_notes(vec!["todo.md".to_string()]);
        let prompt = builder().build(&ctx);
        assert!(prompt.contains("Active note: inbox.md"));
        assert!(prompt.contains("File tree:\n📄 inbox.md"));
        assert!(prompt.contains("Recent notes:\n- todo.md"));
    }

    #[test]
    fn test_completion_always_listed() {
        let builder = PromptBuilder::new(ToolRegistry::with_note_tools().definitions());
        let editor = Mode::get(ModeSlug::Editor);
        assert_eq!(builder.tools_for(&editor).last().unwrap().name, COMPLETION_TOOL);
    }
}
