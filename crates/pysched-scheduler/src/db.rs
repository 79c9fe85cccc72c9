use rusqlite::Connection;

use crate::error::Result;

/// Initialise the trigger schema in `conn`.
///
/// Creates the `triggers` table (idempotent) and an index on `next_run_at`
/// so the due-scan stays efficient with many triggers. Assumes the `scripts`
/// table from `pysched-store` already exists in the same database.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS triggers (
            id                TEXT    NOT NULL PRIMARY KEY,
            script_id         TEXT    NOT NULL REFERENCES scripts(id) ON DELETE CASCADE,
            config            TEXT    NOT NULL,   -- JSON-encoded TriggerConfig
            enabled           INTEGER NOT NULL DEFAULT 1,
            created_at        TEXT    NOT NULL,
            last_triggered_at TEXT,               -- ISO-8601 or NULL
            next_run_at       TEXT                -- ISO-8601 or NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_triggers_script ON triggers (script_id);
        CREATE INDEX IF NOT EXISTS idx_triggers_next_run ON triggers (next_run_at);
        ",
    )?;
    Ok(())
}
