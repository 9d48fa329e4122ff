//! `codeloop chat`: the interactive session.

use std::path::Path;
use std::sync::{Arc, Mutex};

use codeloop_agent::{AgentLoop, CompactionAction, DEFAULT_SYSTEM_PROMPT};
use codeloop_config::AppConfig;
use codeloop_core::event::EventBus;
use codeloop_core::session::Session;
use codeloop_core::store::Store;
use codeloop_security::PermissionPolicy;
use codeloop_store::FileStore;
use codeloop_tools::{ToolExecutor, default_registry};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::input::{Lines, StdinConfirmer, read_line, spawn_stdin_lines};
use crate::render::spawn_renderer;
use crate::slash::{HELP, SlashCommand};

pub struct ChatOptions {
    pub message: Option<String>,
    pub resume: Option<String>,
    pub yolo: bool,
    pub verbose: bool,
}

/// Token of the turn in flight, if any.
type ActiveTurn = Arc<Mutex<Option<CancellationToken>>>;

fn set_active(active: &ActiveTurn, token: Option<CancellationToken>) {
    *active.lock().unwrap_or_else(|p| p.into_inner()) = token;
}

/// First Ctrl-C cancels the running turn; with no turn running it ends the session.
fn spawn_interrupt_handler(root: CancellationToken, active: ActiveTurn) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            let turn = active.lock().unwrap_or_else(|p| p.into_inner()).clone();
            match turn {
                Some(turn) if !turn.is_cancelled() => turn.cancel(),
                _ => {
                    root.cancel();
                    break;
                }
            }
        }
    });
}

fn system_prompt(config: &AppConfig, workspace: &Path) -> String {
    match &config.agent.system_prompt {
        Some(prompt) => prompt.clone(),
        None => format!(
            "{DEFAULT_SYSTEM_PROMPT}\n\nWorking directory: {}",
            workspace.display()
        ),
    }
}

async fn save(store: &FileStore, session: &Session) {
    match store.save(session).await {
        Ok(()) => debug!(session_id = %session.id, "Session saved"),
        Err(e) => {
            warn!(session_id = %session.id, error = %e, "Failed to save session");
            eprintln!("  [warning] could not save session: {e}");
        }
    }
}

async fn run_turn(
    agent: &AgentLoop,
    session: &mut Session,
    input: &str,
    root: &CancellationToken,
    active: &ActiveTurn,
    store: &FileStore,
) {
    let turn = root.child_token();
    set_active(active, Some(turn.clone()));
    let result = agent.run_turn(session, input, &turn).await;
    set_active(active, None);

    match result {
        Ok(report) => debug!(?report, "Turn finished"),
        // Already shown through the event bus
        Err(e) => debug!(error = %e, "Turn failed"),
    }
    save(store, session).await;
}

fn print_usage(agent: &AgentLoop, policy: &PermissionPolicy, session: &Session) {
    let (used, window) = agent.context_usage(session);
    let percent = if window == 0 {
        0.0
    } else {
        used as f64 * 100.0 / window as f64
    };
    println!("  Model:     {}", agent.model());
    println!("  Context:   ~{used} / {window} tokens ({percent:.0}%)");
    println!(
        "  Session:   prompt {} · completion {} · total {}",
        session.usage.prompt, session.usage.completion, session.usage.total
    );
    println!(
        "  History:   {} messages, summary {} chars",
        session.messages.len(),
        session.summary.len()
    );
    println!("  Approvals: {} remembered", policy.approval_count());
}

/// Returns `false` when the REPL should exit.
async fn handle_command(
    command: SlashCommand,
    agent: &AgentLoop,
    policy: &PermissionPolicy,
    session: &mut Session,
    root: &CancellationToken,
    store: &FileStore,
) -> bool {
    match command {
        SlashCommand::Clear => {
            session.clear();
            save(store, session).await;
            println!("  [history cleared]");
        }
        SlashCommand::Compact => match agent.compact_now(session, &root.child_token()).await {
            Ok(CompactionAction::Summarized { dropped_messages }) => {
                save(store, session).await;
                println!("  [compacted: {dropped_messages} messages folded into the summary]");
            }
            Ok(_) => println!("  [nothing to compact yet]"),
            Err(e) => eprintln!("  [error] compaction failed: {e}"),
        },
        SlashCommand::ResetApprovals => {
            policy.reset_approvals();
            println!("  [approvals reset]");
        }
        SlashCommand::Usage => print_usage(agent, policy, session),
        SlashCommand::Help => println!("{HELP}"),
        SlashCommand::Exit => return false,
        SlashCommand::Unknown(line) => {
            println!("  Unknown command: {line}");
            println!("{HELP}");
        }
    }
    true
}

/// Close the event bus and wait for the renderer to print what is queued.
async fn finish_rendering(agent: AgentLoop, event_bus: Arc<EventBus>, renderer: JoinHandle<()>) {
    drop(agent);
    drop(event_bus);
    let _ = renderer.await;
}

async fn prompt_line(lines: &Lines, root: &CancellationToken) -> Option<String> {
    use std::io::Write;
    print!("\n  > ");
    let _ = std::io::stdout().flush();
    tokio::select! {
        _ = root.cancelled() => None,
        line = read_line(lines) => line,
    }
}

pub async fn run(options: ChatOptions) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if options.yolo {
        config.permissions.unrestricted = true;
    }

    if !config.has_api_key() && config.provider.base_url.is_none() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    ANTHROPIC_API_KEY   (provider.kind = \"anthropic\")");
        eprintln!("    OPENAI_API_KEY      (provider.kind = \"openai\")");
        eprintln!("    CODELOOP_API_KEY    (either)");
        eprintln!();
        eprintln!("  Or add it to {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let provider = codeloop_providers::build_from_config(&config.provider)?;
    let workspace = std::env::current_dir()?;
    let store = FileStore::new(config.sessions_dir());
    let mut session = match &options.resume {
        Some(id) => store.load(id).await?,
        None => Session::new(),
    };

    let lines = spawn_stdin_lines();
    let policy =
        Arc::new(PermissionPolicy::new(&config.permissions).with_workspace_root(&workspace));
    let executor = Arc::new(
        ToolExecutor::new(
            default_registry(Some(workspace.clone())),
            policy.clone(),
            Arc::new(StdinConfirmer::new(lines.clone())),
        )
        .with_limits(&config.tools),
    );
    let event_bus = Arc::new(EventBus::default());
    let agent = AgentLoop::from_config(&config, provider, executor, event_bus.clone())
        .with_system_prompt(system_prompt(&config, &workspace));
    let renderer = spawn_renderer(&event_bus, options.verbose);

    let root = CancellationToken::new();
    let active: ActiveTurn = Arc::new(Mutex::new(None));
    spawn_interrupt_handler(root.clone(), active.clone());

    if let Some(message) = options.message {
        run_turn(&agent, &mut session, &message, &root, &active, &store).await;
        finish_rendering(agent, event_bus, renderer).await;
        return Ok(());
    }

    println!();
    println!("  codeloop · {} ({})", agent.model(), agent.provider().name());
    println!("  Workspace: {}", workspace.display());
    println!("  Session:   {}", session.id);
    if !session.messages.is_empty() {
        println!("  Resumed with {} messages", session.messages.len());
    }
    if config.permissions.unrestricted {
        println!("  Mode:      unrestricted (deny-list still applies)");
    }
    println!();
    println!("  Type a request, /help for commands, Ctrl+C to interrupt, Ctrl+D to quit.");

    while let Some(line) = prompt_line(&lines, &root).await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(command) = SlashCommand::parse(line) {
            if !handle_command(command, &agent, &policy, &mut session, &root, &store).await {
                break;
            }
            continue;
        }
        run_turn(&agent, &mut session, line, &root, &active, &store).await;
    }

    save(&store, &session).await;
    if let Err(e) = store.close().await {
        warn!(error = %e, "Failed to close session store");
    }
    finish_rendering(agent, event_bus, renderer).await;
    println!();
    println!("  Session saved: {}", session.id);
    println!("  Resume with: codeloop chat --resume {}", session.id);
    Ok(())
}
