//! Notewright - an AI assistant for your markdown notes

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{
    init_command, modes_command, run_command, setup_command, status_command, RunArgs,
};

/// Notewright - AI assistant for your notes
#[derive(Parser)]
#[command(name = "notewright")]
#[command(about = "◆ An AI assistant for your markdown notes")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config and note workspace
    Init,
    /// Interactive setup wizard
    Setup,
    /// Run a task against the note workspace
    Run {
        /// Instruction for the agent; omit for interactive mode
        #[arg(short, long)]
        message: Option<String>,
        /// Capability profile (editor, organizer, researcher, writer)
        #[arg(long)]
        mode: Option<String>,
        /// Note workspace, overriding the configured one
        #[arg(short, long)]
        workspace: Option<String>,
        /// Note to treat as open in the editor, relative to the workspace
        #[arg(short, long)]
        note: Option<String>,
        /// Approve every tool call without asking
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// List the available modes and their tools
    Modes,
    /// Show system status
    Status,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Init => init_command().await,
        Commands::Setup => setup_command().await,
        Commands::Run {
            message,
            mode,
            workspace,
            note,
            yes,
        } => {
            run_command(RunArgs {
                message,
                mode,
                workspace,
                note,
                yes,
            })
            .await
        }
        Commands::Modes => modes_command(),
        Commands::Status => status_command().await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
