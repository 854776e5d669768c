//! Interactive or single-message chat against one workspace.

use super::render::Renderer;
use orbit_agent::{OrchestrationLoop, TurnOutcome};
use orbit_config::AppConfig;
use orbit_core::event::LoopEvent;
use orbit_tools::Workspace;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

const HELP: &str = "  Commands:
    /clear      start a new conversation
    /workspace  show the workspace path and size
    /help       show this help
    /exit       quit (also /quit, Ctrl+D)

  Ctrl+C cancels the answer in progress.";

pub async fn run(
    workspace: Option<PathBuf>,
    message: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    // Check for the API key early and give a clear error
    if let Err(e) = config.require_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    OPENROUTER_API_KEY=sk-or-v1-...   (recommended)");
        eprintln!("    ORBIT_API_KEY=sk-...              (generic)");
        eprintln!();
        eprintln!("  Or add it to your config file (create one with `orbit --init`):");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err(e.into());
    }

    let root = match workspace {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let workspace = Workspace::new(&root)
        .map_err(|e| format!("Cannot open workspace {}: {e}", root.display()))?;

    let provider = orbit_providers::build_provider(&config)?;
    let registry = Arc::new(orbit_tools::default_registry(&workspace)?);
    let tool_names = registry.names().join(", ");
    let agent = Arc::new(
        OrchestrationLoop::new(provider, registry, config.loop_settings())
            .with_system_prompt(config.system_prompt()),
    );

    if let Some(message) = message {
        // Single message mode
        return match submit(&agent, message).await? {
            TurnOutcome::Completed { .. } => Ok(()),
            TurnOutcome::IterationLimitReached { message, .. } => Err(message.into()),
            TurnOutcome::Cancelled => Err("cancelled".into()),
        };
    }

    println!();
    println!("  orbit: interactive mode");
    println!();
    println!("  Workspace: {}", workspace.root().display());
    println!("  Model:     {}", config.model);
    println!("  Tools:     {tool_names}");
    println!();
    println!("  Type your message and press Enter. /help lists commands.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        match line {
            "" => continue,
            "/exit" | "/quit" => break,
            "/help" => println!("{HELP}"),
            "/workspace" => println!("{}", workspace_summary(&root, workspace.root())),
            "/clear" => match agent.clear_history() {
                Ok(()) => println!("  Conversation cleared."),
                Err(e) => eprintln!("  [error] {e}"),
            },
            _ => {
                // Failures were already rendered from the event stream.
                if let Err(e) = submit(&agent, line.to_string()).await {
                    debug!(error = %e, "Submission ended with an error");
                }
            }
        }
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

/// Path as given, resolved path, and recursive file and directory counts.
fn workspace_summary(given: &Path, resolved: &Path) -> String {
    let (files, dirs) = match count_entries(resolved) {
        Ok((files, dirs)) => (files.to_string(), dirs.to_string()),
        Err(e) => {
            warn!(error = %e, "Could not walk workspace");
            ("?".into(), "?".into())
        }
    };
    format!(
        "  Workspace
    path         {}
    absolute     {}
    files        {files}
    directories  {dirs}

  To use another workspace, start orbit with its path.",
        given.display(),
        resolved.display()
    )
}

fn count_entries(root: &Path) -> Result<(usize, usize), walkdir::Error> {
    let mut files = 0;
    let mut dirs = 0;
    for entry in walkdir::WalkDir::new(root).min_depth(1) {
        let file_type = entry?.file_type();
        if file_type.is_dir() {
            dirs += 1;
        } else if file_type.is_file() {
            files += 1;
        }
    }
    Ok((files, dirs))
}

fn prompt() -> std::io::Result<()> {
    use std::io::Write;
    print!("\n  You > ");
    std::io::stdout().flush()
}

/// Run one submission while rendering its events. Ctrl+C cancels it.
async fn submit(
    agent: &Arc<OrchestrationLoop>,
    text: String,
) -> Result<TurnOutcome, Box<dyn std::error::Error>> {
    let mut events = agent.subscribe();
    let mut renderer = Renderer::new();
    let mut task = tokio::spawn({
        let agent = agent.clone();
        async move { agent.submit(text).await }
    });

    let joined = loop {
        tokio::select! {
            joined = &mut task => break joined,
            event = events.recv() => match event {
                Ok(event) => show(&mut renderer, &event)?,
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event renderer lagged"),
                Err(RecvError::Closed) => {}
            },
            _ = tokio::signal::ctrl_c() => {
                agent.cancel();
            }
        }
    };

    // Everything published before the task returned is already queued.
    drain(&mut renderer, &mut events)?;
    Ok(joined??)
}

fn drain(
    renderer: &mut Renderer,
    events: &mut broadcast::Receiver<Arc<LoopEvent>>,
) -> std::io::Result<()> {
    loop {
        match events.try_recv() {
            Ok(event) => show(renderer, &event)?,
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return Ok(()),
        }
    }
}

fn show(renderer: &mut Renderer, event: &LoopEvent) -> std::io::Result<()> {
    renderer.render(event, &mut std::io::stdout(), &mut std::io::stderr())
}
