use thiserror::Error;

/// Errors from the script store and execution ledger.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Stored JSON column failed to (de)serialize.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authoring-time validation rejected the input.
    #[error("Validation error: {0}")]
    Invalid(String),

    #[error("Script not found: {id}")]
    ScriptNotFound { id: String },

    #[error("Execution not found: {id}")]
    ExecutionNotFound { id: String },

    /// The record already reached a terminal state — finalize happens once.
    #[error("Execution already finalized: {id}")]
    AlreadyFinalized { id: String },
}

impl From<pysched_core::PyschedError> for StoreError {
    fn from(e: pysched_core::PyschedError) -> Self {
        StoreError::Invalid(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
