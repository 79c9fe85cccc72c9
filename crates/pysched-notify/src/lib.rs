//! `pysched-notify` — execution event fan-out and email notifications.
//!
//! The [`Notifier`] trait is the seam between the execution core and
//! whatever real-time delivery exists around it (WebSocket fan-out, chat
//! bots, nothing at all). Events are fire-and-forget: implementations must
//! swallow their own failures — an execution never fails because its
//! announcement did.

pub mod email;
pub mod error;

use async_trait::async_trait;
use tracing::{error, info};

use pysched_core::types::ExecutionStatus;

pub use email::EmailService;
pub use error::{NotifyError, Result};

/// Collaborator interface for execution lifecycle events.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn execution_started(&self, script_id: &str, execution_id: &str);

    async fn execution_completed(
        &self,
        script_id: &str,
        execution_id: &str,
        status: ExecutionStatus,
    );

    async fn execution_errored(&self, script_id: &str, execution_id: &str, error: &str);
}

/// Default notifier: structured log lines, nothing else. Stands in wherever
/// no real-time subsystem is wired up.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn execution_started(&self, script_id: &str, execution_id: &str) {
        info!(script_id, execution_id, "execution started");
    }

    async fn execution_completed(
        &self,
        script_id: &str,
        execution_id: &str,
        status: ExecutionStatus,
    ) {
        info!(script_id, execution_id, %status, "execution completed");
    }

    async fn execution_errored(&self, script_id: &str, execution_id: &str, err: &str) {
        error!(script_id, execution_id, error = err, "execution errored");
    }
}
