//! # Leafcheck: daily Leaflow check-in
//!
//! Usage:
//!   leafcheck                      # Control panel + daily scheduler
//!   leafcheck serve                # Same as above
//!   leafcheck run                  # One batch over the configured accounts, then exit
//!   leafcheck --config ./my.toml   # Custom config file

use anyhow::Result;
use clap::{Parser, Subcommand};
use leafcheck_browser::LeaflowSite;
use leafcheck_core::config::AppConfig;
use leafcheck_gateway::{AppState, CheckinDb};
use leafcheck_runner::{AccountRunner, BatchOrchestrator, RunnerSettings};
use leafcheck_scheduler::{DailySchedule, Notifier, SchedulerEngine, spawn_scheduler};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// How often the scheduler compares the clock with the next run time.
const SCHEDULER_TICK: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(
    name = "leafcheck",
    version,
    about = "🍃 Leafcheck — daily Leaflow check-in automation"
)]
struct Cli {
    /// Config file path
    #[arg(short, long, env = "LEAFCHECK_CONFIG", default_value = "leafcheck.toml")]
    config: String,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the control panel and the daily scheduler
    Serve,
    /// Check in every configured account once and exit
    Run,
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

/// Stdout plus a daily `<log_dir>/checkin.<date>.log`. The guard must live
/// until exit or buffered lines are lost.
fn init_tracing(verbose: bool, log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;
    let file = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(leafcheck_gateway::LOG_FILE_PREFIX)
        .filename_suffix(leafcheck_gateway::LOG_FILE_SUFFIX)
        .max_log_files(leafcheck_gateway::LOG_FILES_KEPT)
        .build(log_dir)?;
    let (file_writer, guard) = tracing_appender::non_blocking(file);

    let filter = if verbose {
        "leafcheck=debug,tower_http=debug"
    } else {
        "leafcheck=info,tower_http=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();
    Ok(guard)
}

fn build_orchestrator(config: &AppConfig, notifier: Arc<Notifier>) -> BatchOrchestrator {
    let site = Arc::new(LeaflowSite::from_config(config));
    let runner = AccountRunner::new(site, RunnerSettings::from_config(config));
    BatchOrchestrator::new(runner, Duration::from_secs(config.runner.account_delay_secs))
        .with_notifier(notifier)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_path(&cli.config);

    // File layer first so the log directory is known before env overrides
    // (and their warnings) are applied.
    let mut config = AppConfig::load(&config_path)?;
    let log_dir = std::env::var("LOG_DIR")
        .ok()
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| config.storage.log_dir.clone());
    let _log_guard = init_tracing(cli.verbose, &expand_path(&log_dir))?;

    config.apply_env();
    config.validate()?;
    tracing::info!("📄 Config loaded from {}", config_path.display());

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, config_path).await,
        Command::Run => run_once(config).await,
    }
}

async fn serve(config: AppConfig, config_path: PathBuf) -> Result<()> {
    let db = Arc::new(
        CheckinDb::open(&expand_path(&config.storage.db_path)).map_err(|e| anyhow::anyhow!(e))?,
    );
    let synced = db.sync_accounts(&config.accounts).map_err(|e| anyhow::anyhow!(e))?;
    if synced > 0 {
        tracing::info!("👥 Synced {synced} configured account(s) into the database");
    }

    let notifier = Arc::new(Notifier::from_config(&config.notify));
    let orchestrator = Arc::new(build_orchestrator(&config, notifier.clone()).with_sink(db.clone()));

    let mut state = AppState::new(config.clone(), config_path, db.clone(), orchestrator.clone())
        .with_notifier(notifier);

    if config.schedule.enabled {
        let schedule = DailySchedule::from_config(&config.schedule)?;
        let engine = Arc::new(SchedulerEngine::new(schedule, orchestrator, db));
        spawn_scheduler(engine.clone(), SCHEDULER_TICK);
        state = state.with_scheduler(engine);
    } else {
        tracing::info!("⏸️ Scheduler disabled, manual runs only");
    }

    leafcheck_gateway::start(state).await
}

async fn run_once(config: AppConfig) -> Result<()> {
    let notifier = Arc::new(Notifier::from_config(&config.notify));
    let orchestrator = build_orchestrator(&config, notifier);

    match orchestrator.try_run(&config.accounts).await {
        Ok(batch) => {
            tracing::info!(
                "🏁 Check-in finished: {}/{} succeeded",
                batch.success_count(),
                batch.total()
            );
            Ok(())
        }
        // Only "no accounts" gets here; the exit status becomes 1.
        Err(e) => {
            tracing::error!("❌ {e}");
            Err(e.into())
        }
    }
}
