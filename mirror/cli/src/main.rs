//! agent-mirror - Command-line surface for the agent backend
//!
//! A thin surface over `mirror-core`: it streams a turn and prints the
//! transcript as it grows, waits for a long-running backend operation, or
//! runs one of the cached reads.
//!
//! # Usage
//!
//! ```bash
//! # Ask a question and stream the agent's steps
//! agent-mirror ask "Why does the login test fail?" --repo acme/web
//!
//! # Wait until a repository is indexed
//! agent-mirror wait-ready acme/web
//!
//! # Cached reads
//! agent-mirror issues acme/web --state open
//! agent-mirror diff 3f2c1ab src/lib.rs --split
//!
//! # Custom backend and verbose logging
//! agent-mirror --base-url http://10.0.0.2:8000/api ask "hi"
//! RUST_LOG=mirror_core=debug agent-mirror ask "hi"
//! ```
//!
//! # Signals
//!
//! - `SIGINT` (Ctrl-C): cancel the running turn or poll and exit

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};

use mirror_core::{
    default_config_path, load_config_from_path, AgentBackend, ConfigOverrides, DiffView, Fetched,
    HttpBackend, MirrorConfig, PollOutcome, RequestCoordinator, StepKind, Turn, TurnRequest,
    TurnState,
};

/// agent-mirror - Stream and inspect a remote coding agent
#[derive(Parser, Debug)]
#[command(name = "agent-mirror")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "MIRROR_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Backend base URL (overrides config file and environment)
    #[arg(short = 'u', long, value_name = "URL")]
    base_url: Option<String>,

    /// Debounce delay in milliseconds
    #[arg(long, value_name = "MS")]
    debounce_ms: Option<u64>,

    /// Status poll interval in milliseconds
    #[arg(long, value_name = "MS")]
    poll_interval_ms: Option<u64>,

    /// Maximum number of status checks
    #[arg(long, value_name = "N")]
    max_poll_attempts: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "MIRROR_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a prompt and stream the agent's turn
    Ask {
        /// The prompt
        message: String,

        /// Repository the question is about
        #[arg(short, long)]
        repo: Option<String>,

        /// Backend session to continue
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Poll a long-running backend operation until it settles
    WaitReady {
        /// Operation target (e.g. a repository being indexed)
        target: String,
    },

    /// List issues of a repository
    Issues {
        /// Repository
        repo: String,

        /// Issue state filter
        #[arg(long, default_value = "open")]
        state: String,
    },

    /// List pull requests of a repository
    Pulls {
        /// Repository
        repo: String,

        /// Pull request state filter
        #[arg(long, default_value = "open")]
        state: String,
    },

    /// Show the commit timeline of a branch
    Timeline {
        /// Branch name
        branch: String,
    },

    /// Show the diff of one file at one commit
    Diff {
        /// Commit SHA
        sha: String,

        /// File path
        path: String,

        /// Side-by-side view
        #[arg(long)]
        split: bool,
    },
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            base_url: self.base_url.clone(),
            debounce_ms: self.debounce_ms,
            poll_interval_ms: self.poll_interval_ms,
            max_poll_attempts: self.max_poll_attempts,
        }
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("agent_mirror={level},mirror_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration with CLI overrides applied
fn resolve_config(args: &Args) -> Result<MirrorConfig> {
    let path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(path).context("Failed to load configuration")?;
    args.overrides()
        .apply(&mut config)
        .context("Invalid command-line override")?;
    info!(source = %config.source(), base_url = %config.backend.base_url, "Configuration resolved");
    Ok(config)
}

/// Print the steps of `turn` that have not been printed yet
fn print_new_steps(turn: &Turn, printed: &mut usize) {
    for step in turn.transcript().steps().iter().skip(*printed) {
        match step.kind {
            StepKind::Answer => {}
            StepKind::Action => match step.tool_name() {
                Some(tool) => eprintln!("[action:{tool}] {}", step.content),
                None => eprintln!("[action] {}", step.content),
            },
            kind => eprintln!("[{kind}] {}", step.content),
        }
    }
    *printed = turn.transcript().len();
}

async fn run_ask(coordinator: &RequestCoordinator, request: TurnRequest) -> Result<()> {
    let mut handle = coordinator.start_turn(request);
    let mut printed = 0;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, cancelling turn");
                handle.cancel();
                break;
            }
            snapshot = handle.changed() => match snapshot {
                Some(turn) => print_new_steps(&turn, &mut printed),
                None => break,
            },
        }
    }

    let turn = handle.wait().await;
    print_new_steps(&turn, &mut printed);
    match turn.state() {
        TurnState::Completed => {
            println!("{}", turn.visible_content());
            for suggestion in turn.suggestions() {
                eprintln!("  > {suggestion}");
            }
            Ok(())
        }
        TurnState::Cancelled => {
            eprintln!("Cancelled.");
            Ok(())
        }
        state => {
            let reason = turn.error().unwrap_or(turn.visible_content());
            anyhow::bail!("Turn ended {state:?}: {reason}")
        }
    }
}

async fn run_wait_ready(coordinator: &RequestCoordinator, target: &str) -> Result<()> {
    let handle = coordinator.spawn_status_poll(target);
    let mut progress = handle.progress();

    let printer = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let Some(report) = progress.borrow_and_update().clone() else {
                continue;
            };
            match report.progress.fraction() {
                Some(fraction) => eprintln!("{} ({:.0}%)", report.status, fraction * 100.0),
                None => eprintln!("{}", report.status),
            }
        }
    });

    let outcome = tokio::select! {
        outcome = handle.outcome() => outcome,
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, cancelling poll");
            PollOutcome::Cancelled { attempts: 0 }
        }
    };
    printer.abort();

    debug!(next_action = ?outcome.next_action(), "Polling finished");
    println!("{}", outcome.user_message());
    match outcome {
        PollOutcome::Ready(_) | PollOutcome::Cancelled { .. } => Ok(()),
        other => anyhow::bail!("Backend not ready: {}", other.user_message()),
    }
}

async fn run_diff(
    coordinator: &RequestCoordinator,
    mut diffs: mpsc::UnboundedReceiver<Fetched<Value>>,
    sha: &str,
    path: &str,
    view: DiffView,
) -> Result<()> {
    coordinator.request_diff(sha, path, view);
    let fetched = diffs
        .recv()
        .await
        .context("Diff request was dropped before completing")?;
    let value = fetched.result.context("Failed to fetch diff")?;
    print_json(&value)
}

fn print_json(value: &Value) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to render response")?;
    println!("{text}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging first
    init_logging(&args.log_level);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = resolve_config(&args)?;
    let backend: Arc<dyn AgentBackend> =
        Arc::new(HttpBackend::new(&config.backend).context("Failed to create HTTP backend")?);
    let (coordinator, diffs) = RequestCoordinator::new(backend, &config);

    let result = match args.command {
        Command::Ask {
            message,
            repo,
            session,
        } => {
            let mut request = TurnRequest::new(message);
            request.repo = repo;
            request.session_id = session;
            run_ask(&coordinator, request).await
        }
        Command::WaitReady { target } => run_wait_ready(&coordinator, &target).await,
        Command::Issues { repo, state } => coordinator
            .fetch_issues(&repo, &state)
            .await
            .context("Failed to fetch issues")
            .and_then(|v| print_json(&v)),
        Command::Pulls { repo, state } => coordinator
            .fetch_pull_requests(&repo, &state)
            .await
            .context("Failed to fetch pull requests")
            .and_then(|v| print_json(&v)),
        Command::Timeline { branch } => coordinator
            .fetch_timeline(&branch)
            .await
            .context("Failed to fetch timeline")
            .and_then(|v| print_json(&v)),
        Command::Diff { sha, path, split } => {
            let view = if split { DiffView::Split } else { DiffView::Unified };
            run_diff(&coordinator, diffs, &sha, &path, view).await
        }
    };

    coordinator.shutdown();
    result
}
