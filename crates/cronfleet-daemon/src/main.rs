use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use cronfleet_core::CronfleetConfig;
use cronfleet_scheduler::{ExecuteError, LocalFuncExecutor, Scheduler, SchedulerOptions};
use cronfleet_store::{JobStore, SqliteJobStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cronfleet_daemon=info,cronfleet_scheduler=info,cronfleet_store=info".into()),
        )
        .init();

    // load config: explicit path > CRONFLEET_CONFIG env > ~/.cronfleet/cronfleet.toml
    let config_path = std::env::var("CRONFLEET_CONFIG").ok();
    let config = CronfleetConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        CronfleetConfig::default()
    });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite job store");

    let conn = rusqlite::Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;

    let store = Arc::new(SqliteJobStore::new(
        conn,
        Duration::from_secs(config.scheduler.lease_timeout_secs),
    )?);

    // Executor registration happens here, before the loop starts; the
    // registry is read-only once the scheduler runs.
    let mut local = LocalFuncExecutor::new();
    for name in &config.shell_tasks {
        local.register_fn(name, shell_task);
        info!(task = %name, "registered shell task");
    }

    let opts = SchedulerOptions {
        max_concurrent: config.scheduler.max_concurrent,
        claim_timeout: Duration::from_millis(config.scheduler.claim_timeout_ms),
        renew_interval: Duration::from_secs(config.scheduler.renew_interval_secs),
        idle_backoff: Duration::from_millis(config.scheduler.idle_backoff_ms),
    };
    let mut scheduler = Scheduler::new(Arc::clone(&store) as Arc<dyn JobStore>, opts);
    scheduler.register_executor(Arc::new(local));

    let cancel = CancellationToken::new();
    let loop_handle = tokio::spawn(scheduler.run(cancel.clone()));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    cancel.cancel();
    // In-flight executors see the cancelled token; jobs whose executors
    // ignore it stay Running and self-heal via lease expiry.
    loop_handle.await?;

    Ok(())
}

/// Built-in runner for `shell_tasks`: executes the job's config payload
/// with `sh -c`, killing the child if the run token is cancelled.
async fn shell_task(
    cancel: CancellationToken,
    job: cronfleet_store::Job,
) -> Result<(), ExecuteError> {
    let mut child = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(&job.config)
        .spawn()
        .map_err(|e| ExecuteError::Failed(format!("spawn failed: {e}")))?;

    tokio::select! {
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            Err(ExecuteError::Cancelled)
        }
        status = child.wait() => match status {
            Ok(s) if s.success() => Ok(()),
            Ok(s) => Err(ExecuteError::Failed(format!("exit status: {s}"))),
            Err(e) => Err(ExecuteError::Failed(e.to_string())),
        },
    }
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
