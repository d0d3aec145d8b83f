//! chime-daemon: the poller process.
//!
//! Runs one scheduler engine over a data directory and executes fired
//! schedules: `command` actions run through the shell, `message` actions are
//! logged for an outer delivery surface to pick up.

use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};

use chime_core::ChimeConfig;
use chime_scheduler::{
    LockManager, SchedulerEngine, ScheduleAction, ScheduleRecord, ScheduleStore,
};

#[derive(Parser, Debug)]
#[command(name = "chime-daemon", about = "Filesystem-resident schedule poller")]
struct Args {
    /// Config file path (default: CHIME_CONFIG env, then ~/.chime/chime.toml).
    #[arg(long)]
    config: Option<String>,

    /// Override the configured data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Override the configured poll interval in seconds.
    #[arg(long)]
    tick_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chime_daemon=info,chime_scheduler=info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = ChimeConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({e}), using defaults");
        ChimeConfig::default()
    });
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(tick_secs) = args.tick_secs {
        config.scheduler.tick_secs = tick_secs;
    }

    info!(data_dir = %config.data_dir.display(), "starting chime daemon");

    // Fired-record channel: SchedulerEngine → executor task
    let (fired_tx, mut fired_rx) = tokio::sync::mpsc::channel::<ScheduleRecord>(256);

    let store = ScheduleStore::new(&config.data_dir);
    let locks = LockManager::new(&config.data_dir);
    let engine = SchedulerEngine::new(store, locks, &config.scheduler, Some(fired_tx));

    // Executor: drains fired records without ever blocking the tick loop.
    tokio::spawn(async move {
        while let Some(record) = fired_rx.recv().await {
            match record.action {
                ScheduleAction::Command { ref command } => {
                    run_command(&record.id, command).await;
                }
                ScheduleAction::Message { ref message } => {
                    // Delivery routing (chat surfaces etc.) lives outside the
                    // daemon; the log line is the hand-off point.
                    info!(schedule_id = %record.id, %message, "schedule message fired");
                }
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine_task = tokio::spawn(engine.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    engine_task.await?;

    Ok(())
}

/// Run a fired command through the shell and log its outcome.
async fn run_command(schedule_id: &str, command: &str) {
    let output = tokio::process::Command::new("sh")
        .arg("-lc")
        .arg(command)
        .output()
        .await;

    match output {
        Ok(output) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            if output.status.success() {
                info!(
                    schedule_id = %schedule_id,
                    stdout = %stdout.trim(),
                    "schedule command finished"
                );
            } else {
                warn!(
                    schedule_id = %schedule_id,
                    status = %output.status,
                    stderr = %stderr.trim(),
                    "schedule command failed"
                );
            }
        }
        Err(e) => {
            warn!(schedule_id = %schedule_id, "schedule command spawn failed: {e}");
        }
    }
}
