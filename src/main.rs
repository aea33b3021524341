use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use a3s_shell::agent::{AgentBuilder, AgentEvent, CompactionOutcome, ContextItem, Mode, TurnInput, TurnOutcome};
use a3s_shell::cancel::CancellationController;
use a3s_shell::config::{ShellConfig, ENV_API_KEY};
use a3s_shell::hitl::{ConfirmationManager, TimeoutAction};
use a3s_shell::llm::OpenAiClient;
use a3s_shell::prompts;
use a3s_shell::rpc::RpcManager;
use a3s_shell::shell::CommandSession;
use a3s_shell::tools::{register_builtins, ToolRegistry};
use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};

/// Longest tool output echoed to the terminal
const PREVIEW_CHARS: usize = 400;

const HELP: &str = "\
Commands:
  /help              Show this help
  /plan              Switch to plan mode (investigate, no changes)
  /build             Switch to build mode (default)
  /tools             List registered tools
  /context <path>    Attach a file to the next message
  /skill [path]      Use a file as standing instructions (no path clears)
  /compact           Summarize the conversation so far
  /clear             Start a fresh conversation
  /exit, /quit       Leave the shell

Press Ctrl-C during a turn to cancel it, or at the prompt to exit.";

#[derive(Parser)]
#[command(
    name = "a3s-shell",
    version,
    about = "Interactive coding assistant in your terminal"
)]
struct Cli {
    /// Path to config.json (default: <config dir>/a3s-shell/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Workspace directory (default: current directory)
    #[arg(short, long)]
    workspace: Option<PathBuf>,

    /// Model name
    #[arg(long)]
    model: Option<String>,

    /// OpenAI-compatible endpoint
    #[arg(long)]
    base_url: Option<String>,

    /// Run every tool without asking
    #[arg(long)]
    auto_confirm: bool,

    /// Never ask before running this tool (repeatable)
    #[arg(long = "allow-tool", value_name = "NAME")]
    allow_tool: Vec<String>,

    /// Start in plan mode
    #[arg(long)]
    plan: bool,

    /// Log level (overrides config; RUST_LOG wins over both)
    #[arg(long)]
    log_level: Option<String>,
}

type Lines = Arc<Mutex<mpsc::Receiver<String>>>;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ShellConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {e:#}", "[a3s-shell]".red().bold());
            std::process::exit(1);
        }
    };

    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    if let Err(e) = run(cli, config).await {
        eprintln!("{} {e:#}", "[a3s-shell]".red().bold());
        std::process::exit(1);
    }
}

async fn run(cli: Cli, mut config: ShellConfig) -> anyhow::Result<()> {
    config.apply_env();
    if let Some(model) = cli.model {
        config.provider.model = model;
    }
    if let Some(base_url) = cli.base_url {
        config.provider.base_url = base_url;
    }
    if cli.auto_confirm {
        config.auto_confirm = true;
    }
    config.allowed_tools.extend(cli.allow_tool);

    let workspace = match cli.workspace {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    let workspace = workspace
        .canonicalize()
        .with_context(|| format!("Workspace not found: {}", workspace.display()))?;

    let api_key = config.provider.api_key.clone().unwrap_or_else(|| {
        tracing::warn!("No API key configured; set {} or OPENAI_API_KEY", ENV_API_KEY);
        String::new()
    });
    let llm = Arc::new(
        OpenAiClient::new(api_key, config.provider.model.clone())
            .with_base_url(&config.provider.base_url),
    );

    let registry = Arc::new(ToolRegistry::new());
    let shell = Arc::new(CommandSession::new(config.shell.clone(), workspace.clone()));
    register_builtins(&registry, shell.clone());

    let rpc = RpcManager::new(registry.clone());
    for server in config.rpc_servers.iter().filter(|s| s.enabled) {
        match rpc.connect(server).await {
            Ok(count) => println!(
                "{} connected {} ({} tools)",
                "●".green(),
                server.name.bold(),
                count
            ),
            Err(e) => eprintln!(
                "{} failed to connect {}: {}",
                "●".red(),
                server.name.bold(),
                e
            ),
        }
    }

    let mut confirmations = ConfirmationManager::new();
    if let Some(secs) = config.confirm_timeout_secs {
        confirmations = confirmations.with_timeout(Duration::from_secs(secs), TimeoutAction::Reject);
    }
    let confirmations = Arc::new(confirmations);

    let lines = spawn_stdin_reader();
    tokio::spawn(prompt_confirmations(confirmations.clone(), lines.clone()));

    let (event_tx, mut event_rx) = mpsc::channel::<AgentEvent>(256);
    let system_prompt = config
        .system_prompt
        .clone()
        .unwrap_or_else(|| prompts::DEFAULT_SYSTEM_PROMPT.to_string());
    let mut agent = AgentBuilder::new()
        .llm_client(llm)
        .registry(registry.clone())
        .workspace(workspace.clone())
        .system_prompt(Some(system_prompt))
        .max_tool_rounds(config.max_tool_rounds)
        .policy(config.policy())
        .confirmation_handler(confirmations.clone())
        .event_sender(event_tx)
        .build()?;

    let controller = CancellationController::new();
    // Ctrl-C with no running turn leaves the shell
    let (quit_tx, mut quit_rx) = mpsc::channel::<()>(1);
    controller.listen_ctrl_c(move || {
        let _ = quit_tx.try_send(());
    });
    let mut mode = if cli.plan { Mode::Plan } else { Mode::Build };
    let mut pending_context: Vec<ContextItem> = Vec::new();
    let mut skill: Option<String> = None;

    println!(
        "{} {} in {} ({})",
        "a3s-shell".cyan().bold(),
        env!("CARGO_PKG_VERSION"),
        workspace.display(),
        config.provider.model
    );
    println!("Type {} for commands.", "/help".bold());

    loop {
        print_prompt(mode).await;
        let next = tokio::select! {
            line = async { lines.lock().await.recv().await } => line,
            _ = quit_rx.recv() => {
                println!();
                None
            }
        };
        let line = match next {
            Some(line) => line,
            None => break,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            let (name, arg) = match command.split_once(char::is_whitespace) {
                Some((name, arg)) => (name, arg.trim()),
                None => (command, ""),
            };
            match name {
                "exit" | "quit" => break,
                "help" => println!("{}", HELP),
                "plan" => {
                    mode = Mode::Plan;
                    println!("Mode: {}", "plan".yellow());
                }
                "build" => {
                    mode = Mode::Build;
                    println!("Mode: {}", "build".green());
                }
                "tools" => {
                    for name in registry.list() {
                        if let Some(tool) = registry.get(&name) {
                            println!(
                                "  {:<32} {:<8} {:?}",
                                name,
                                format!("{:?}", tool.kind()).dimmed(),
                                tool.class()
                            );
                        }
                    }
                }
                "context" => {
                    if arg.is_empty() {
                        eprintln!("{} usage: /context <path>", "[a3s-shell]".red().bold());
                        continue;
                    }
                    match tokio::fs::read_to_string(workspace.join(arg)).await {
                        Ok(content) => {
                            pending_context.push(ContextItem {
                                label: arg.to_string(),
                                content,
                            });
                            println!("Attached {} to the next message", arg.bold());
                        }
                        Err(e) => eprintln!("{} {}: {}", "[a3s-shell]".red().bold(), arg, e),
                    }
                }
                "skill" => {
                    if arg.is_empty() {
                        skill = None;
                        println!("Skill cleared");
                        continue;
                    }
                    match tokio::fs::read_to_string(workspace.join(arg)).await {
                        Ok(content) => {
                            skill = Some(content);
                            println!("Using {} as instructions", arg.bold());
                        }
                        Err(e) => eprintln!("{} {}: {}", "[a3s-shell]".red().bold(), arg, e),
                    }
                }
                "compact" => match agent.compact().await {
                    Ok(CompactionOutcome::Compacted { before, after }) => {
                        println!("Compacted {} messages into {}", before, after)
                    }
                    Ok(CompactionOutcome::Skipped) => println!("Nothing to compact"),
                    Err(e) => eprintln!("{} {}", "[a3s-shell]".red().bold(), e),
                },
                "clear" => {
                    agent.clear();
                    pending_context.clear();
                    println!("Conversation cleared");
                }
                other => eprintln!(
                    "{} unknown command /{} (try /help)",
                    "[a3s-shell]".red().bold(),
                    other
                ),
            }
            continue;
        }

        let input = TurnInput {
            text: line.to_string(),
            context: std::mem::take(&mut pending_context),
            instructions: skill.clone(),
            mode,
        };

        let turn = controller.begin_turn();
        let result = {
            let run = agent.run_turn(input, turn.token());
            tokio::pin!(run);
            loop {
                tokio::select! {
                    result = &mut run => break result,
                    Some(event) = event_rx.recv() => print_event(event),
                }
            }
        };
        drop(turn);
        while let Ok(event) = event_rx.try_recv() {
            print_event(event);
        }

        match result {
            Ok(TurnOutcome::Completed { .. }) => {}
            Ok(TurnOutcome::Cancelled) => println!("{}", "Turn cancelled".yellow()),
            Err(e) => eprintln!("{} {}", "[a3s-shell]".red().bold(), e),
        }
    }

    rpc.disconnect_all().await;
    shell.shutdown().await;
    Ok(())
}

/// Forward stdin lines so both the REPL and confirmation prompts can read them
fn spawn_stdin_reader() -> Lines {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });
    Arc::new(Mutex::new(rx))
}

async fn prompt_confirmations(manager: Arc<ConfirmationManager>, lines: Lines) {
    let mut requests = manager.subscribe();
    loop {
        let request = match requests.recv().await {
            Ok(request) => request,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Missed confirmation requests");
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        };

        println!(
            "{} {} {}",
            "?".yellow().bold(),
            request.tool_name.bold(),
            preview(&request.args.to_string()).dimmed()
        );
        print!("  Allow? [y/N] ");
        let _ = std::io::Write::flush(&mut std::io::stdout());

        // Stop reading once the request is settled elsewhere (turn cancelled,
        // timeout) so the next line goes back to the REPL
        let answer = {
            let mut lines = lines.lock().await;
            tokio::select! {
                line = lines.recv() => line.unwrap_or_default(),
                _ = manager.resolved(&request.tool_id) => {
                    println!("{}", "(no longer pending)".dimmed());
                    continue;
                }
            }
        };
        let approved = matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes");
        let reason = (!approved).then(|| "Declined by user".to_string());
        if !manager.confirm(&request.tool_id, approved, reason) {
            println!("{}", "  (no longer pending)".dimmed());
        }
    }
}

async fn print_prompt(mode: Mode) {
    let label = match mode {
        Mode::Plan => "plan".yellow(),
        Mode::Build => "a3s".cyan(),
    };
    let mut stdout = tokio::io::stdout();
    let _ = stdout.write_all(format!("{}> ", label).as_bytes()).await;
    let _ = stdout.flush().await;
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}…", head)
    } else {
        head
    }
}

fn print_event(event: AgentEvent) {
    match event {
        AgentEvent::TurnStart { round } => tracing::debug!(round, "Model round"),
        AgentEvent::AssistantText { text } => println!("{}", text),
        AgentEvent::ToolStart { name, .. } => println!("{} {}", "→".cyan(), name.bold()),
        AgentEvent::ToolEnd {
            name,
            output,
            success,
            ..
        } => {
            let marker = if success { "✓".green() } else { "✗".red() };
            println!("{} {}", marker, name);
            if !output.is_empty() {
                println!("{}", preview(&output).dimmed());
            }
        }
        AgentEvent::ToolRejected { name, reason, .. } => {
            println!("{} {} ({})", "⊘".yellow(), name, reason)
        }
        AgentEvent::End { text } => println!("\n{}\n", text),
        AgentEvent::Cancelled => {}
        AgentEvent::Error { message } => tracing::debug!(%message, "Turn error"),
    }
}
