use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{error, info, warn};

use pysched_daemon::worker::{ExecutionHandle, WorkerContext, WorkerPool};
use pysched_notify::{EmailService, LogNotifier, Notifier};
use pysched_scheduler::{DispatchEngine, TriggerCatalog};
use pysched_store::{ExecutionLedger, ScriptStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "pysched_daemon=info,pysched_scheduler=info,pysched_store=info,\
                 pysched_runner=info,pysched_notify=info"
                    .into()
            }),
        )
        .init();

    // load config: explicit path via PYSCHED_CONFIG > ~/.pysched/pysched.toml
    let config_path = std::env::var("PYSCHED_CONFIG").ok();
    let config = pysched_core::PyschedConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        pysched_core::PyschedConfig::default()
    });

    // initialize SQLite database — single file for all subsystems
    let db_path = config.database.path.clone();
    ensure_parent_dir(&db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(&db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

    // run all schema migrations (idempotent)
    pysched_store::db::init_db(&db)?;
    pysched_scheduler::db::init_db(&db)?;
    info!("database migrations complete");

    // build subsystems — each gets its own connection for thread safety
    let scripts = Arc::new(ScriptStore::new(rusqlite::Connection::open(&db_path)?));
    let ledger = Arc::new(ExecutionLedger::new(rusqlite::Connection::open(&db_path)?));
    let catalog = Arc::new(TriggerCatalog::new(rusqlite::Connection::open(&db_path)?));

    // crash recovery: no record may stay `running` across a restart
    match ledger.recover_interrupted() {
        Ok(0) => {}
        Ok(n) => warn!(count = n, "recovered interrupted executions"),
        Err(e) => error!("startup recovery failed: {e}"),
    }

    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let email = match &config.email {
        Some(email_config) => match EmailService::new(email_config) {
            Ok(service) => {
                info!(server = %email_config.smtp_server, "email notifications enabled");
                Some(Arc::new(service))
            }
            Err(e) => {
                warn!("email disabled: {e}");
                None
            }
        },
        None => None,
    };

    // dispatch → worker queue plus the shared in-flight trigger set
    let (queue_tx, queue_rx) =
        tokio::sync::mpsc::channel(config.daemon.queue_depth.max(1));
    let in_flight = Arc::new(DashMap::new());

    let ctx = Arc::new(WorkerContext::new(
        Arc::clone(&scripts),
        Arc::clone(&ledger),
        notifier,
        email,
        Arc::clone(&in_flight),
        Path::new(&config.data.path).to_path_buf(),
        config.execution.clone(),
        config.runtime.default_python.clone(),
    ));
    let pool = WorkerPool::spawn(Arc::clone(&ctx), queue_rx, config.daemon.workers);

    // management surfaces enqueue "run now" through this handle
    let _execution_handle = ExecutionHandle::new(queue_tx.clone());

    let engine = DispatchEngine::new(
        Arc::clone(&catalog),
        queue_tx.clone(),
        Arc::clone(&in_flight),
        config.daemon.tick_secs,
    );

    // startup triggers fire once per daemon start, before the periodic loop
    if let Err(e) = engine.startup_pass() {
        error!("startup trigger pass failed: {e}");
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine_task = tokio::spawn(engine.run(shutdown_rx));

    info!(
        workers = config.daemon.workers,
        tick_secs = config.daemon.tick_secs,
        "pysched daemon running — ctrl-c to stop"
    );
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    // stop dispatching, close the queue, then drain in-flight work
    let _ = shutdown_tx.send(true);
    let _ = engine_task.await;
    drop(queue_tx);
    drop(_execution_handle);

    let grace = Duration::from_secs(config.daemon.shutdown_grace_secs);
    if pool.join(grace).await {
        info!("all executions drained — goodbye");
    } else {
        warn!(
            grace_secs = config.daemon.shutdown_grace_secs,
            "grace period expired with executions still in flight"
        );
    }

    Ok(())
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
