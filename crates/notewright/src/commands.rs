//! Notewright command implementations

use anyhow::{Context, Result};
use serde::Deserialize;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use notewright_agent::context::scan_file_tree;
use notewright_agent::{
    AgentLoop, AgentSettings, AgentStatus, MessageAdded, Mode, ModeSlug, StatusChanged,
    TaskContext, ToolCallPending,
};
use notewright_config::{self, paths::expand_home, Config, ProviderConfig};
use notewright_provider::{Message, OpenRouterProvider, Role};

type NoteAgent = AgentLoop<OpenRouterProvider>;

const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";

/// Options of the `run` command
pub struct RunArgs {
    pub message: Option<String>,
    pub mode: Option<String>,
    pub workspace: Option<String>,
    pub note: Option<String>,
    pub yes: bool,
}

/// Read line from stdin
fn read_line() -> Result<String> {
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

/// Read password from stdin (masked input)
fn read_password() -> Result<String> {
    rpassword::read_password().or_else(|_| read_line())
}

fn prompt(text: &str) -> Result<String> {
    print!("{}", text);
    std::io::stdout().flush()?;
    read_line()
}

/// Terminal input for `run`. One thread reads stdin and hands lines to
/// whichever prompt is waiting, so an abandoned prompt never holds on to
/// the next line.
#[derive(Clone)]
struct Console {
    lines: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>>,
}

impl Console {
    fn new(lines: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            lines: Arc::new(tokio::sync::Mutex::new(lines)),
        }
    }

    fn stdin() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || {
            for line in std::io::stdin().lines() {
                let Ok(line) = line else { break };
                if tx.send(line.trim().to_string()).is_err() {
                    break;
                }
            }
        });
        Self::new(rx)
    }

    /// Next line after showing `text`; `None` once stdin is closed
    async fn prompt(&self, text: &str) -> Result<Option<String>> {
        print!("{}", text);
        std::io::stdout().flush()?;
        Ok(self.lines.lock().await.recv().await)
    }
}

/// Run one task, or a conversation of follow-up tasks when no message is given
pub async fn run_command(args: RunArgs) -> Result<()> {
    let mode = args
        .mode
        .as_deref()
        .map(str::parse::<Mode>)
        .transpose()?;

    let config = Config::load().await?;
    let workspace = args
        .workspace
        .as_deref()
        .map(expand_home)
        .unwrap_or_else(|| config.workspace_path());
    if !workspace.is_dir() {
        anyhow::bail!(
            "Workspace {} does not exist. Run `notewright init` first.",
            workspace.display()
        );
    }

    let api_key = config
        .api_key()
        .context("No API key configured. Run `notewright setup` or edit ~/.notewright/config.json")?;
    let provider = OpenRouterProvider::new(api_key, config.api_base(), Some(config.default_model()));

    let mut settings = AgentSettings::from_config(&config);
    if let Some(mode) = mode {
        settings.mode = mode;
    }
    settings.auto_approve |= args.yes;
    info!(
        "◆ RUNNING IN {} MODE ON {:?}",
        settings.mode.slug.as_str().to_uppercase(),
        workspace
    );

    let agent = Arc::new(AgentLoop::with_note_tools(provider, settings));
    debug!("◆ {} TOOLS REGISTERED", agent.tools().definitions().len());
    let console = Console::stdin();

    let _printer = agent.on::<MessageAdded, _>(|event| {
        if let Some(line) = render_message(&event.message) {
            println!("{}", line);
        }
    });
    let (status_tx, status_rx) = watch::channel(AgentStatus::Idle);
    let _status = agent.on::<StatusChanged, _>(move |event| {
        debug!("◆ STATUS {} -> {}", event.previous, event.current);
        status_tx.send_replace(event.current);
    });

    // approvals are answered on stdin outside the event handler
    let (pending_tx, pending_rx) = mpsc::unbounded_channel::<ToolCallPending>();
    let _pending = agent.on::<ToolCallPending, _>(move |event| {
        let _ = pending_tx.send(event.clone());
    });
    let approvals = tokio::spawn(answer_approvals(
        Arc::clone(&agent),
        console.clone(),
        status_rx,
        pending_rx,
    ));

    let result = match args.message {
        Some(message) => {
            let ctx = task_context(&workspace, args.note.as_deref()).await?;
            drive(&agent, message, ctx).await.map(|_| ())
        }
        None => interactive(&agent, &console, &workspace, args.note.as_deref()).await,
    };

    approvals.abort();
    result
}

async fn task_context(workspace: &Path, note: Option<&str>) -> Result<TaskContext> {
    let mut ctx = TaskContext::new(workspace);

    match scan_file_tree(workspace).await {
        Ok(tree) => ctx = ctx.with_file_tree(tree),
        Err(e) => warn!("◆ COULD NOT SCAN WORKSPACE: {}", e),
    }

    if let Some(note) = note {
        let path = workspace.join(note);
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Could not read note {}", path.display()))?;
        ctx = ctx.with_active_note(note, Some(content));
    }

    Ok(ctx)
}

/// Run a task to its end. Ctrl-C aborts the task, not the process.
async fn drive(agent: &Arc<NoteAgent>, instruction: String, ctx: TaskContext) -> Result<AgentStatus> {
    let runner = Arc::clone(agent);
    let mut task = tokio::spawn(async move { runner.start_task(&instruction, ctx).await });

    tokio::select! {
        joined = &mut task => return finish(agent, joined?),
        _ = tokio::signal::ctrl_c() => {
            println!("\n◆ Aborting...");
            agent.abort();
        }
    }

    let status = task.await?;
    finish(agent, status)
}

fn finish(agent: &NoteAgent, status: AgentStatus) -> Result<AgentStatus> {
    match status {
        AgentStatus::Completed => println!("\n◆ Done"),
        AgentStatus::Aborted => println!("\n◆ Aborted"),
        AgentStatus::Error => {
            let reason = agent
                .state()
                .last_error
                .unwrap_or_else(|| "unknown error".to_string());
            anyhow::bail!("Task failed: {}", reason);
        }
        other => warn!("◆ TASK ENDED IN STATE {}", other),
    }
    Ok(status)
}

async fn interactive(
    agent: &Arc<NoteAgent>,
    console: &Console,
    workspace: &Path,
    note: Option<&str>,
) -> Result<()> {
    println!(
        "◆ Interactive mode in {} (type 'exit' to quit)",
        workspace.display()
    );
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    loop {
        let Some(input) = console.prompt("◆ ").await? else {
            break;
        };
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }

        // rescan so the prompt sees changes made by earlier tasks
        let ctx = task_context(workspace, note).await?;
        if let Err(e) = drive(agent, input, ctx).await {
            println!("✗ {:#}", e);
        }
    }

    Ok(())
}

/// Ask y/N for a pending call. `None` when the agent stopped waiting
/// first (abort or approval timeout); the prompt is then abandoned.
async fn ask_approval(console: &Console, mut status: watch::Receiver<AgentStatus>) -> Option<bool> {
    tokio::select! {
        line = console.prompt("Allow? (y/N): ") => Some(
            line.ok()
                .flatten()
                .map(|a| matches!(a.to_lowercase().as_str(), "y" | "yes"))
                .unwrap_or(false),
        ),
        _ = async { status.wait_for(|s| *s != AgentStatus::WaitingApproval).await.ok(); } => None,
    }
}

async fn answer_approvals(
    agent: Arc<NoteAgent>,
    console: Console,
    status: watch::Receiver<AgentStatus>,
    mut pending: mpsc::UnboundedReceiver<ToolCallPending>,
) {
    while let Some(call) = pending.recv().await {
        let params = serde_json::to_string_pretty(&call.params).unwrap_or_default();
        println!("\n◆ Approval needed: {}\n{}", call.name, params);

        match ask_approval(&console, status.clone()).await {
            Some(answer) => {
                if !agent.approve_tool_call(answer) {
                    debug!("◆ APPROVAL FOR {} ARRIVED TOO LATE", call.name);
                }
            }
            None => println!("\n◆ Approval for {} withdrawn", call.name),
        }
    }
}

/// Value of `attr="..."` in the first line of a tagged message
fn attribute<'a>(text: &'a str, attr: &str) -> Option<&'a str> {
    let head = text.lines().next()?;
    let start = head.find(&format!("{}=\"", attr))? + attr.len() + 2;
    let len = head[start..].find('"')?;
    Some(&head[start..start + len])
}

/// Body between the first line and the closing tag of a tool result
fn tagged_body(text: &str) -> &str {
    let body = text.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
    body.rsplit_once('\n').map(|(inner, _)| inner).unwrap_or(body)
}

/// How a conversation message is shown on the terminal, if at all
fn render_message(message: &Message) -> Option<String> {
    let content = message.content.trim();

    match message.role {
        Role::System => None,
        Role::Assistant => Some(format!("\n◆ {}", content)),
        Role::User if content.starts_with("<task>") => None,
        Role::User if content.starts_with("<tool_result") => {
            let name = attribute(content, "name").unwrap_or("tool");
            if name == "attempt_completion" {
                Some(format!("\n✓ {}", tagged_body(content)))
            } else {
                Some(format!("  ✓ {}", name))
            }
        }
        Role::User if content.starts_with("<tool_error") => {
            let name = attribute(content, "name").unwrap_or("tool");
            let reason = tagged_body(content).lines().next().unwrap_or("");
            Some(format!("  ✗ {}: {}", name, reason))
        }
        Role::User => content.lines().next().map(|line| format!("  ! {}", line)),
    }
}

/// Show modes and the tools each one offers
pub fn modes_command() -> Result<()> {
    println!("◆ Modes");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    for mode in Mode::all() {
        let marker = if mode.slug == ModeSlug::default() {
            " (default)"
        } else {
            ""
        };
        println!("{}{}", mode.slug, marker);
        println!("  {}", mode.tools.join(", "));
    }
    Ok(())
}

/// OpenRouter model response
#[derive(Debug, Deserialize)]
struct ModelsResponse {
    data: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    id: String,
    name: Option<String>,
}

/// Model families offered first in the setup wizard
const TARGET_MODELS: &[&str] = &["claude", "gpt", "gemini", "kimi", "minimax"];

/// Fetch available models from OpenRouter
async fn fetch_openrouter_models(api_key: &str) -> Result<Vec<ModelInfo>> {
    let client = reqwest::Client::new();
    let response = client
        .get("https://openrouter.ai/api/v1/models")
        .header("Authorization", format!("Bearer {}", api_key))
        .send()
        .await?;

    if !response.status().is_success() {
        anyhow::bail!("Failed to fetch models: {}", response.status());
    }

    let models: ModelsResponse = response.json().await?;
    Ok(models.data)
}

fn filter_models(models: Vec<ModelInfo>) -> Vec<ModelInfo> {
    models
        .into_iter()
        .filter(|m| {
            let id = m.id.to_lowercase();
            TARGET_MODELS.iter().any(|target| id.contains(target))
        })
        .collect()
}

/// Resolve a menu answer to a model id
fn pick_model(choice: &str, models: &[ModelInfo]) -> Option<String> {
    match choice {
        "d" | "D" | "" => Some(DEFAULT_MODEL.to_string()),
        num => num
            .parse::<usize>()
            .ok()
            .filter(|idx| *idx > 0 && *idx <= models.len())
            .map(|idx| models[idx - 1].id.clone()),
    }
}

/// Interactive setup wizard
pub async fn setup_command() -> Result<()> {
    println!("◆ Notewright Setup Wizard");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();

    println!("Step 1: OpenRouter API Key");
    println!("Get your API key at: https://openrouter.ai/keys");
    println!();

    let (api_key, models) = loop {
        print!("Enter your OpenRouter API key: ");
        std::io::stdout().flush()?;
        let key = read_password()?;

        if key.is_empty() {
            println!("API key cannot be empty. Please try again.");
            continue;
        }

        print!("Validating API key... ");
        std::io::stdout().flush()?;

        match fetch_openrouter_models(&key).await {
            Ok(models) => {
                println!("✓ Valid!");
                break (key, filter_models(models));
            }
            Err(e) => {
                println!("✗ {}", e);
                let answer = prompt("The key could not be validated. Try again? (Y/n/skip): ")?
                    .to_lowercase();
                match answer.as_str() {
                    "skip" | "s" => break (key, Vec::new()),
                    "n" | "no" => anyhow::bail!("Setup cancelled"),
                    _ => {}
                }
            }
        }
    };
    println!();

    println!("Step 2: Select Default Model");
    if !models.is_empty() {
        println!("Available models:");
        for (i, model) in models.iter().take(10).enumerate() {
            let name = model.name.as_ref().unwrap_or(&model.id);
            println!("  {}. {} ({})", i + 1, name, model.id);
        }
    }
    println!("  m. Enter model ID manually");
    println!("  d. Use default ({})", DEFAULT_MODEL);

    let choice = prompt("Your choice: ")?;
    let model = if choice.eq_ignore_ascii_case("m") {
        prompt(&format!("Enter model ID (e.g., {}): ", DEFAULT_MODEL))?
    } else {
        pick_model(&choice, &models[..models.len().min(10)]).unwrap_or_else(|| {
            println!("Invalid selection, using default.");
            DEFAULT_MODEL.to_string()
        })
    };
    println!();

    println!("Step 3: Default Mode");
    for (i, slug) in ModeSlug::ALL.iter().enumerate() {
        println!("  {}. {}", i + 1, slug);
    }
    let mode = prompt("Your choice (Enter for editor): ")?
        .parse::<usize>()
        .ok()
        .and_then(|i| ModeSlug::ALL.get(i.wrapping_sub(1)).copied())
        .unwrap_or_default();
    println!();

    println!("Step 4: Saving Configuration");
    let config_path = notewright_config::config_path();
    let mut config = if config_path.exists() {
        Config::load().await.unwrap_or_default()
    } else {
        Config::default()
    };

    config.providers.openrouter = ProviderConfig {
        api_key,
        api_base: Some("https://openrouter.ai/api/v1".to_string()),
    };
    config.agent.model = model;
    config.agent.default_mode = mode.as_str().to_string();

    config.save().await?;
    println!("✓ Saved to {}", config_path.display());
    println!();

    println!("Step 5: Workspace Setup");
    let workspace = config.workspace_path();
    prepare_workspace(&workspace).await?;
    println!("✓ Notes live in {}", workspace.display());
    println!();

    println!("Setup complete! ✓");
    println!();
    println!("Next steps:");
    println!("  - Ask about your notes: notewright run -m \"What did I write about gardening?\"");
    println!("  - Tidy up:              notewright run --mode organizer -m \"Group my notes by topic\"");
    println!("  - Check status:         notewright status");

    Ok(())
}

/// Initialize config and workspace
pub async fn init_command() -> Result<()> {
    println!("◆ Initializing Notewright...");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = notewright_config::init().await?;
    let workspace = config.workspace_path();
    prepare_workspace(&workspace).await?;

    println!("\n◆ Notewright initialized");
    println!("Config:    {}", notewright_config::config_path().display());
    println!("Workspace: {}", workspace.display());
    println!("\nNext steps:");
    println!("  1. Add your API key to ~/.notewright/config.json (or run `notewright setup`)");
    println!("     Get one at: https://openrouter.ai/keys");
    println!("  2. Start working: notewright run -m \"Summarize my inbox\"");

    Ok(())
}

async fn prepare_workspace(workspace: &Path) -> Result<()> {
    tokio::fs::create_dir_all(workspace)
        .await
        .with_context(|| format!("Could not create workspace {}", workspace.display()))?;
    create_template(workspace, "Welcome.md", WELCOME_MD).await
}

async fn create_template(dir: &Path, filename: &str, content: &str) -> Result<()> {
    let path = dir.join(filename);
    if !path.exists() {
        tokio::fs::write(&path, content).await?;
        info!("◆ CREATED {}", path.display());
    }
    Ok(())
}

fn count_notes(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| !is_hidden(path))
        .map(|path| {
            if path.is_dir() {
                count_notes(&path)
            } else {
                usize::from(path.extension().map_or(false, |ext| ext == "md"))
            }
        })
        .sum()
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map_or(false, |name| name.to_string_lossy().starts_with('.'))
}

/// Show status
pub async fn status_command() -> Result<()> {
    let config_path = notewright_config::config_path();

    println!("◆ Notewright Status");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    println!(
        "Config:    {} {}",
        config_path.display(),
        if config_path.exists() {
            "[OK]"
        } else {
            "[Missing]"
        }
    );

    let config = Config::load().await?;
    let workspace = config.workspace_path();
    if workspace.is_dir() {
        println!(
            "Workspace: {} [OK, {} notes]",
            workspace.display(),
            count_notes(&workspace)
        );
    } else {
        println!("Workspace: {} [Missing]", workspace.display());
    }

    println!("Model:     {}", config.default_model());
    println!("Mode:      {}", config.agent.default_mode);
    println!(
        "API Key:   {}",
        if config.has_api_key() {
            "[Set]"
        } else {
            "[Missing]"
        }
    );
    println!(
        "Approval:  {}",
        if config.agent.auto_approve {
            "automatic"
        } else {
            "ask before changing notes"
        }
    );

    println!("\n◆ Ready");

    Ok(())
}

const WELCOME_MD: &str = r#"# Welcome to Notewright

This folder is your note workspace. Every markdown file in it is a note.

## Try

- `notewright run -m "Summarize this note" --note Welcome.md`
- `notewright run --mode writer -m "Draft a weekly review template"`
- `notewright run --mode organizer -m "Move my meeting notes into a meetings folder"`

Notewright asks before it creates, edits, moves or deletes anything,
unless you pass `--yes`.
"#;
