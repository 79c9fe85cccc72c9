use thiserror::Error;

/// Errors from workspace provisioning. Script execution itself never
/// errors — [`crate::exec::run`] reports failures as data.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// venv creation or dependency install failed; the message carries the
    /// subprocess stderr. Retryable by caller policy.
    #[error("Provisioning failed: {0}")]
    Provision(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A diagnostic subprocess probe exceeded its time bound.
    #[error("Probe timed out after {secs}s")]
    ProbeTimeout { secs: u64 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RunnerError>;
