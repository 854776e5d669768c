//! orbit CLI: the main entry point.
//!
//! `orbit [WORKSPACE]` starts an interactive session whose tools operate
//! inside WORKSPACE (default: the current directory). `-m` sends a single
//! message instead. `--init` writes a default config file.

use clap::Parser;
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "orbit",
    about = "orbit: a tool-using AI coding assistant for your terminal",
    version
)]
struct Cli {
    /// Workspace directory the tools operate in
    workspace: Option<PathBuf>,

    /// Send a single message instead of entering interactive mode
    #[arg(short, long)]
    message: Option<String>,

    /// Write a default ~/.orbit/config.toml and exit
    #[arg(long)]
    init: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the assistant's answer.
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if cli.init {
        return commands::init::run();
    }

    commands::chat::run(cli.workspace, cli.message).await
}
