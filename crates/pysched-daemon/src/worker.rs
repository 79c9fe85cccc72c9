//! The execution pipeline: workers drain the dispatch queue, provision the
//! script's runtime, run it, and finalize the ledger record.
//!
//! Retry policy lives here: provisioning failures are retried with
//! exponential backoff up to a fixed attempt budget; execution failures
//! (non-zero exit, timeout, launch error) are terminal for the attempt and
//! never retried — a failing script will fail again, so it waits for its
//! next occurrence or a manual re-run.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use pysched_core::config::ExecutionConfig;
use pysched_core::types::{ExecutionRequest, Script, TriggeredBy};
use pysched_notify::{EmailService, Notifier};
use pysched_runner::truncate::truncate_output;
use pysched_runner::{Provisioner, RunnerError, ScriptWorkspace};
use pysched_store::{ExecutionLedger, ExecutionOutcome, ScriptStore};

/// Everything a worker needs, shared across the pool.
pub struct WorkerContext {
    pub scripts: Arc<ScriptStore>,
    pub ledger: Arc<ExecutionLedger>,
    pub notifier: Arc<dyn Notifier>,
    pub email: Option<Arc<EmailService>>,
    /// Trigger ids with an execution in flight; shared with the dispatch
    /// engine, cleared here when an attempt terminates.
    pub in_flight: Arc<DashMap<String, ()>>,
    /// Root for per-script workspaces.
    pub data_path: PathBuf,
    pub execution: ExecutionConfig,
    /// Interpreter version for scripts that do not pin one.
    pub default_python: String,
    /// Per-script locks serializing workspace mutation (provision + run).
    workspace_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl WorkerContext {
    pub fn new(
        scripts: Arc<ScriptStore>,
        ledger: Arc<ExecutionLedger>,
        notifier: Arc<dyn Notifier>,
        email: Option<Arc<EmailService>>,
        in_flight: Arc<DashMap<String, ()>>,
        data_path: PathBuf,
        execution: ExecutionConfig,
        default_python: String,
    ) -> Self {
        Self {
            scripts,
            ledger,
            notifier,
            email,
            in_flight,
            data_path,
            execution,
            default_python,
            workspace_locks: DashMap::new(),
        }
    }

    /// The lock guarding one script's workspace. Never removed — the map
    /// grows with the number of distinct scripts ever executed, which is
    /// bounded and small.
    fn workspace_lock(&self, script_id: &str) -> Arc<Mutex<()>> {
        self.workspace_locks
            .entry(script_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Handle for enqueueing immediate, non-scheduled executions ("run now",
/// URL-triggered invocations). Follows the same ledger/runner pipeline as
/// scheduled firings.
#[derive(Clone)]
pub struct ExecutionHandle {
    queue: mpsc::Sender<ExecutionRequest>,
}

impl ExecutionHandle {
    pub fn new(queue: mpsc::Sender<ExecutionRequest>) -> Self {
        Self { queue }
    }

    /// Enqueue an execution of `script_id`. Returns false when the daemon
    /// is shutting down or the queue is saturated.
    pub async fn request_execution(&self, script_id: &str, triggered_by: TriggeredBy) -> bool {
        let request = ExecutionRequest {
            script_id: script_id.to_string(),
            trigger_id: None,
            triggered_by,
        };
        self.queue.send(request).await.is_ok()
    }
}

/// A bounded pool of workers draining the dispatch queue.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers sharing one receiver. Workers exit when every
    /// queue sender is dropped and the backlog is drained.
    pub fn spawn(
        ctx: Arc<WorkerContext>,
        queue: mpsc::Receiver<ExecutionRequest>,
        count: usize,
    ) -> Self {
        let queue = Arc::new(Mutex::new(queue));
        let handles = (0..count.max(1))
            .map(|worker_id| {
                let ctx = Arc::clone(&ctx);
                let queue = Arc::clone(&queue);
                tokio::spawn(async move {
                    debug!(worker_id, "execution worker started");
                    loop {
                        // Hold the receiver lock only for the recv itself so
                        // idle workers don't starve each other.
                        let request = { queue.lock().await.recv().await };
                        match request {
                            Some(request) => handle_request(&ctx, request).await,
                            None => break,
                        }
                    }
                    debug!(worker_id, "execution worker stopped");
                })
            })
            .collect();
        Self { handles }
    }

    /// Wait for all workers to finish, up to `grace`. Returns false when
    /// the grace period expired with executions still in flight.
    pub async fn join(self, grace: Duration) -> bool {
        let drain = async {
            for handle in self.handles {
                let _ = handle.await;
            }
        };
        tokio::time::timeout(grace, drain).await.is_ok()
    }
}

/// Run one request through the full pipeline, then clear its in-flight mark.
async fn handle_request(ctx: &WorkerContext, request: ExecutionRequest) {
    execute(ctx, &request).await;
    if let Some(trigger_id) = &request.trigger_id {
        ctx.in_flight.remove(trigger_id);
    }
}

async fn execute(ctx: &WorkerContext, request: &ExecutionRequest) {
    let script = match ctx.scripts.get(&request.script_id) {
        Ok(Some(script)) => script,
        Ok(None) => {
            warn!(script_id = %request.script_id, "script vanished before execution — dropped");
            return;
        }
        Err(e) => {
            error!(script_id = %request.script_id, "cannot load script: {e}");
            return;
        }
    };
    if !script.enabled {
        // Disabled between claim and pickup; losing the occurrence is the
        // intended effect of disabling.
        debug!(script_id = %script.id, "script disabled — request dropped");
        return;
    }

    // Exclusive workspace ownership for the whole provision + run span.
    let lock = ctx.workspace_lock(&script.id);
    let _guard = lock.lock().await;

    let record = match ctx.ledger.begin(
        &script.id,
        request.trigger_id.as_deref(),
        request.triggered_by,
    ) {
        Ok(record) => record,
        Err(e) => {
            error!(script_id = %script.id, "cannot create execution record: {e}");
            return;
        }
    };
    ctx.notifier.execution_started(&script.id, &record.id).await;

    let workspace = ScriptWorkspace::new(&ctx.data_path, script.folder.as_deref(), &script.slug);
    let provisioner = Provisioner::new(workspace);

    if let Err(e) = provision_with_retry(ctx, &provisioner, &script).await {
        let message = format!("provisioning failed: {e}");
        error!(script_id = %script.id, execution_id = %record.id, "{message}");
        if let Err(store_err) = ctx.ledger.fail(&record.id, &message) {
            error!(execution_id = %record.id, "cannot finalize failed record: {store_err}");
        }
        ctx.notifier
            .execution_errored(&script.id, &record.id, &message)
            .await;
        return;
    }

    let outcome = pysched_runner::run(
        provisioner.workspace(),
        &script.source,
        &script.env_vars,
        Duration::from_secs(ctx.execution.timeout_secs),
    )
    .await;

    let status = outcome.status();
    let cap = ctx.execution.output_max_chars;
    let ledger_outcome = ExecutionOutcome {
        status,
        exit_code: outcome.exit_code,
        stdout: truncate_output(&outcome.stdout, cap),
        stderr: truncate_output(&outcome.stderr, cap),
        duration_ms: outcome.duration_ms,
    };

    if let Err(e) = ctx.ledger.finalize(&record.id, &ledger_outcome) {
        error!(execution_id = %record.id, "cannot finalize execution record: {e}");
    }

    info!(
        script_id = %script.id,
        execution_id = %record.id,
        %status,
        duration_ms = outcome.duration_ms,
        "execution finished"
    );

    ctx.notifier
        .execution_completed(&script.id, &record.id, status)
        .await;

    send_email_if_configured(ctx, &script, status, &outcome.stdout, &outcome.stderr).await;
}

/// Ensure + sync under the retry budget. The per-script workspace lock is
/// already held; backoff sleeps intentionally keep holding it, since any
/// concurrent attempt would hit the same broken environment.
async fn provision_with_retry(
    ctx: &WorkerContext,
    provisioner: &Provisioner,
    script: &Script,
) -> Result<(), RunnerError> {
    let max_attempts = ctx.execution.retry_max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let result = async {
            let version = if script.python_version.is_empty() {
                &ctx.default_python
            } else {
                &script.python_version
            };
            provisioner.ensure(version).await?;
            provisioner.sync(&script.requirements).await
        }
        .await;

        match result {
            Ok(()) => return Ok(()),
            Err(e) if attempt >= max_attempts => return Err(e),
            Err(e) => {
                let delay = backoff_delay(ctx.execution.retry_base_secs, attempt);
                warn!(
                    script_id = %script.id,
                    attempt,
                    delay_secs = delay.as_secs(),
                    "provisioning failed, retrying: {e}"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Exponential backoff: `base * 2^(attempt-1)`.
fn backoff_delay(base_secs: u64, attempt: u32) -> Duration {
    Duration::from_secs(base_secs.saturating_mul(1u64 << (attempt - 1).min(16)))
}

async fn send_email_if_configured(
    ctx: &WorkerContext,
    script: &Script,
    status: pysched_core::types::ExecutionStatus,
    stdout: &str,
    stderr: &str,
) {
    let Some(email) = &ctx.email else { return };
    if !script.email_notifications
        || script.email_recipients.trim().is_empty()
        || !script.email_filter.matches(status)
    {
        return;
    }

    let combined = format!("{stdout}\n{stderr}");
    // Best-effort: the result is logged inside the service and ignored here.
    let _ = email
        .send_script_notification(&script.name, status, &combined, &script.email_recipients)
        .await;
}
