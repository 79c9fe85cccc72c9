use rusqlite::Connection;

use crate::error::Result;

/// Initialise the script and execution tables in `conn`.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout. The
/// `triggers` table is owned by `pysched-scheduler` and created by its own
/// `init_db`; `executions.trigger_id` is therefore a plain column, not a
/// foreign key.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS scripts (
            id                  TEXT    NOT NULL PRIMARY KEY,
            name                TEXT    NOT NULL,
            slug                TEXT    NOT NULL,
            folder              TEXT,               -- path segment or NULL
            description         TEXT    NOT NULL DEFAULT '',
            source              TEXT    NOT NULL,
            python_version      TEXT    NOT NULL DEFAULT '3.12',
            requirements        TEXT    NOT NULL DEFAULT '',
            env_vars            TEXT    NOT NULL DEFAULT '{}',  -- JSON object
            enabled             INTEGER NOT NULL DEFAULT 1,
            email_notifications INTEGER NOT NULL DEFAULT 0,
            email_recipients    TEXT    NOT NULL DEFAULT '',
            email_filter        TEXT    NOT NULL DEFAULT 'all',
            created_at          TEXT    NOT NULL,
            updated_at          TEXT    NOT NULL,
            last_executed_at    TEXT,
            execution_count     INTEGER NOT NULL DEFAULT 0,
            success_count       INTEGER NOT NULL DEFAULT 0
        ) STRICT;

        -- Slug uniqueness is per folder; NULL folders collapse to ''.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_scripts_slug
            ON scripts (slug, coalesce(folder, ''));

        CREATE TABLE IF NOT EXISTS executions (
            id           TEXT    NOT NULL PRIMARY KEY,
            script_id    TEXT    NOT NULL REFERENCES scripts(id) ON DELETE CASCADE,
            trigger_id   TEXT,               -- owned by the scheduler subsystem
            started_at   TEXT    NOT NULL,
            finished_at  TEXT,
            duration_ms  INTEGER,
            status       TEXT    NOT NULL DEFAULT 'running',
            exit_code    INTEGER,
            stdout       TEXT,
            stderr       TEXT,
            triggered_by TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_executions_script
            ON executions (script_id, started_at DESC);
        CREATE INDEX IF NOT EXISTS idx_executions_status
            ON executions (status, started_at DESC);
        ",
    )?;
    Ok(())
}
