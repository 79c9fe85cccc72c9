use thiserror::Error;

/// Errors from the trigger catalog and dispatch engine.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Stored trigger config failed to (de)serialize.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The cron expression is malformed.
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    /// The trigger configuration is invalid (e.g. non-positive interval).
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Trigger not found: {id}")]
    TriggerNotFound { id: String },

    #[error("Script not found: {id}")]
    ScriptNotFound { id: String },
}

pub type Result<T> = std::result::Result<T, ScheduleError>;
