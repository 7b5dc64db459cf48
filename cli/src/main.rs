//! Kagan automation CLI entry point. Loads configuration, wires the default
//! adapters (SQLite repositories, git worktree workspace, process-backed
//! agents, logging notifier), and runs the automation core until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use kagan_automation_core::adapters::{process_agent_factory, GitWorkspaceService, LoggingNotifier, SqliteExecutionRepository, SqliteTaskRepository};
use kagan_automation_core::{AutomationService, AutomationServices, KaganConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "kagan-automation",
    about = "Local workstation automation core for supervising autonomous coding agents",
    version = env!("CARGO_PKG_VERSION")
)]
struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Git repository root to operate against
    #[arg(long, value_name = "PATH", default_value = ".")]
    repo: PathBuf,

    /// Directory worktrees are created under
    #[arg(long, value_name = "PATH", default_value = ".kagan/worktrees")]
    worktrees: PathBuf,

    /// SQLite database file for tasks/executions
    #[arg(long, value_name = "PATH", default_value = ".kagan/kagan.sqlite3")]
    db: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(args.log_level.parse()?))
        .with_target(false)
        .init();

    let config = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "loading configuration");
            KaganConfig::load_from_path(path).await?
        }
        None => {
            info!("using default configuration");
            KaganConfig::default()
        }
    };

    let tasks = Arc::new(SqliteTaskRepository::new(&args.db).await?);
    let executions = Arc::new(SqliteExecutionRepository::new(&args.db).await?);
    let workspace = Arc::new(GitWorkspaceService::new(args.repo, args.worktrees));
    let notifier = Arc::new(LoggingNotifier::new());

    let services = AutomationServices {
        tasks,
        executions,
        workspace,
        notifier,
        agent_factory: process_agent_factory(),
        merge_backend: None,
    };

    let service = AutomationService::new(services, config.automation);
    service.start().await;

    info!("kagan automation core running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    service.stop().await;

    Ok(())
}
