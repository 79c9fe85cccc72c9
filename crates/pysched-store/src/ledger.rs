use std::sync::Mutex;

use chrono::Utc;
use rusqlite::Connection;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use pysched_core::types::{ExecutionRecord, ExecutionStatus, TriggeredBy};

use crate::error::{Result, StoreError};

/// Terminal result handed to [`ExecutionLedger::finalize`].
///
/// Output is expected to be pre-truncated by the caller; the ledger persists
/// whatever it is given.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// Append-only ledger of execution attempts.
///
/// Sole mutator of `executions` rows and of the owning script's running
/// counters. Records are created `running` *before* the runner starts, so a
/// crash mid-run leaves a discoverable row for [`recover_interrupted`] to
/// sweep on the next start.
///
/// [`recover_interrupted`]: ExecutionLedger::recover_interrupted
pub struct ExecutionLedger {
    db: Mutex<Connection>,
}

impl ExecutionLedger {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Insert the `running` record for an attempt that is about to start.
    #[instrument(skip(self), fields(script_id, triggered_by = %triggered_by))]
    pub fn begin(
        &self,
        script_id: &str,
        trigger_id: Option<&str>,
        triggered_by: TriggeredBy,
    ) -> Result<ExecutionRecord> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO executions (id, script_id, trigger_id, started_at, status, triggered_by)
             VALUES (?1, ?2, ?3, ?4, 'running', ?5)",
            rusqlite::params![id, script_id, trigger_id, now, triggered_by.to_string()],
        )?;

        self.get_locked(&db, &id)?
            .ok_or(StoreError::ExecutionNotFound { id })
    }

    /// Transition a `running` record to its terminal state and update the
    /// owning script's counters, all in one transaction.
    ///
    /// Exactly-once: a record that already reached a terminal state returns
    /// [`StoreError::AlreadyFinalized`].
    #[instrument(skip(self, outcome), fields(execution_id = %id, status = %outcome.status))]
    pub fn finalize(&self, id: &str, outcome: &ExecutionOutcome) -> Result<()> {
        if !outcome.status.is_terminal() {
            return Err(StoreError::Invalid(format!(
                "finalize requires a terminal status, got {}",
                outcome.status
            )));
        }

        let now = Utc::now().to_rfc3339();
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;

        let n = tx.execute(
            "UPDATE executions SET
                finished_at = ?1,
                duration_ms = ?2,
                status      = ?3,
                exit_code   = ?4,
                stdout      = ?5,
                stderr      = ?6
             WHERE id = ?7 AND status = 'running'",
            rusqlite::params![
                now,
                outcome.duration_ms as i64,
                outcome.status.to_string(),
                outcome.exit_code,
                outcome.stdout,
                outcome.stderr,
                id,
            ],
        )?;
        if n == 0 {
            // Either the id is unknown or someone finalized it first.
            let exists: bool = tx
                .query_row("SELECT 1 FROM executions WHERE id = ?1", [id], |_| Ok(true))
                .unwrap_or(false);
            return Err(if exists {
                StoreError::AlreadyFinalized { id: id.to_string() }
            } else {
                StoreError::ExecutionNotFound { id: id.to_string() }
            });
        }

        let success = (outcome.status == ExecutionStatus::Success) as i64;
        tx.execute(
            "UPDATE scripts SET
                last_executed_at = ?1,
                execution_count  = execution_count + 1,
                success_count    = success_count + ?2
             WHERE id = (SELECT script_id FROM executions WHERE id = ?3)",
            rusqlite::params![now, success, id],
        )?;

        tx.commit()?;
        info!(execution_id = %id, status = %outcome.status, "execution finalized");
        Ok(())
    }

    /// Finalize as `failed` for errors raised outside the runner — a
    /// provisioning failure, a store hiccup, anything that kept the script
    /// from ever producing an outcome. The attempt still counts.
    pub fn fail(&self, id: &str, error: &str) -> Result<()> {
        self.finalize(
            id,
            &ExecutionOutcome {
                status: ExecutionStatus::Failed,
                exit_code: None,
                stdout: String::new(),
                stderr: error.to_string(),
                duration_ms: 0,
            },
        )
    }

    /// Startup sweep: mark any record a previous process left `running` as
    /// `failed`. Returns how many rows were swept.
    pub fn recover_interrupted(&self) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE executions SET
                status      = 'failed',
                finished_at = ?1,
                stderr      = 'execution interrupted by daemon restart'
             WHERE status = 'running'",
            [&now],
        )?;
        if n > 0 {
            warn!(count = n, "interrupted executions marked failed on startup");
        }
        Ok(n)
    }

    /// Retrieve a record by id, `None` when it does not exist.
    pub fn get(&self, id: &str) -> Result<Option<ExecutionRecord>> {
        let db = self.db.lock().unwrap();
        self.get_locked(&db, id)
    }

    /// All records currently in `running` state, newest first.
    pub fn running(&self) -> Result<Vec<ExecutionRecord>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions
             WHERE status = 'running' ORDER BY started_at DESC"
        ))?;
        let rows = stmt.query_map([], row_to_execution)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// The most recent records across all scripts.
    pub fn recent(&self, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions
             ORDER BY started_at DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map([limit as i64], row_to_execution)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// History for one script, newest first.
    pub fn list_for_script(&self, script_id: &str, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions
             WHERE script_id = ?1 ORDER BY started_at DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![script_id, limit as i64],
            row_to_execution,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn get_locked(&self, db: &Connection, id: &str) -> Result<Option<ExecutionRecord>> {
        match db.query_row(
            &format!("SELECT {EXECUTION_COLUMNS} FROM executions WHERE id = ?1"),
            [id],
            row_to_execution,
        ) {
            Ok(r) => Ok(Some(r)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }
}

const EXECUTION_COLUMNS: &str = "id, script_id, trigger_id, started_at, finished_at, duration_ms, \
     status, exit_code, stdout, stderr, triggered_by";

/// Map a SQLite row (in `EXECUTION_COLUMNS` order) to an `ExecutionRecord`.
fn row_to_execution(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    let status_str: String = row.get(6)?;
    let status = status_str.parse().unwrap_or(ExecutionStatus::Failed);
    let by_str: String = row.get(10)?;
    let triggered_by = by_str.parse().unwrap_or(TriggeredBy::Manual);

    Ok(ExecutionRecord {
        id: row.get(0)?,
        script_id: row.get(1)?,
        trigger_id: row.get(2)?,
        started_at: row.get(3)?,
        finished_at: row.get(4)?,
        duration_ms: row.get::<_, Option<i64>>(5)?.map(|v| v as u64),
        status,
        exit_code: row.get(7)?,
        stdout: row.get(8)?,
        stderr: row.get(9)?,
        triggered_by,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::scripts::{NewScript, ScriptStore};

    /// One in-memory connection shared by both stores is not possible, so
    /// ledger tests run against a throwaway database file.
    struct TestDb {
        path: std::path::PathBuf,
    }

    impl TestDb {
        fn new() -> Self {
            let path = std::env::temp_dir().join(format!(
                "pysched-ledger-test-{}.db",
                Uuid::new_v4()
            ));
            let conn = Connection::open(&path).unwrap();
            init_db(&conn).unwrap();
            Self { path }
        }

        fn scripts(&self) -> ScriptStore {
            ScriptStore::new(Connection::open(&self.path).unwrap())
        }

        fn ledger(&self) -> ExecutionLedger {
            ExecutionLedger::new(Connection::open(&self.path).unwrap())
        }
    }

    impl Drop for TestDb {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    fn success_outcome() -> ExecutionOutcome {
        ExecutionOutcome {
            status: ExecutionStatus::Success,
            exit_code: Some(0),
            stdout: "ok\n".into(),
            stderr: String::new(),
            duration_ms: 12,
        }
    }

    #[test]
    fn begin_creates_running_record() {
        let db = TestDb::new();
        let script = db.scripts().create(NewScript::new("S", "print(1)")).unwrap();
        let ledger = db.ledger();

        let record = ledger
            .begin(&script.id, None, TriggeredBy::Manual)
            .unwrap();
        assert_eq!(record.status, ExecutionStatus::Running);
        assert!(record.finished_at.is_none());
        assert_eq!(ledger.running().unwrap().len(), 1);
    }

    #[test]
    fn finalize_updates_record_and_counters() {
        let db = TestDb::new();
        let scripts = db.scripts();
        let script = scripts.create(NewScript::new("S", "print(1)")).unwrap();
        let ledger = db.ledger();

        let record = ledger
            .begin(&script.id, None, TriggeredBy::Schedule)
            .unwrap();
        ledger.finalize(&record.id, &success_outcome()).unwrap();

        let record = ledger.get(&record.id).unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Success);
        assert_eq!(record.exit_code, Some(0));
        assert!(record.finished_at.is_some());

        let script = scripts.get(&script.id).unwrap().unwrap();
        assert_eq!(script.execution_count, 1);
        assert_eq!(script.success_count, 1);
        assert!(script.last_executed_at.is_some());
    }

    #[test]
    fn failed_outcome_does_not_bump_success_count() {
        let db = TestDb::new();
        let scripts = db.scripts();
        let script = scripts.create(NewScript::new("S", "print(1)")).unwrap();
        let ledger = db.ledger();

        let record = ledger.begin(&script.id, None, TriggeredBy::Url).unwrap();
        ledger
            .finalize(
                &record.id,
                &ExecutionOutcome {
                    status: ExecutionStatus::Failed,
                    exit_code: Some(1),
                    stdout: String::new(),
                    stderr: "boom".into(),
                    duration_ms: 5,
                },
            )
            .unwrap();

        let script = scripts.get(&script.id).unwrap().unwrap();
        assert_eq!(script.execution_count, 1);
        assert_eq!(script.success_count, 0);
    }

    #[test]
    fn finalize_is_exactly_once() {
        let db = TestDb::new();
        let script = db.scripts().create(NewScript::new("S", "print(1)")).unwrap();
        let ledger = db.ledger();

        let record = ledger.begin(&script.id, None, TriggeredBy::Manual).unwrap();
        ledger.finalize(&record.id, &success_outcome()).unwrap();

        assert!(matches!(
            ledger.finalize(&record.id, &success_outcome()),
            Err(StoreError::AlreadyFinalized { .. })
        ));
        assert!(matches!(
            ledger.finalize("missing", &success_outcome()),
            Err(StoreError::ExecutionNotFound { .. })
        ));
    }

    #[test]
    fn fail_records_error_text() {
        let db = TestDb::new();
        let script = db.scripts().create(NewScript::new("S", "print(1)")).unwrap();
        let ledger = db.ledger();

        let record = ledger.begin(&script.id, None, TriggeredBy::Schedule).unwrap();
        ledger.fail(&record.id, "venv creation failed").unwrap();

        let record = ledger.get(&record.id).unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.stderr.as_deref(), Some("venv creation failed"));
    }

    #[test]
    fn recover_interrupted_sweeps_running_rows() {
        let db = TestDb::new();
        let script = db.scripts().create(NewScript::new("S", "print(1)")).unwrap();
        let ledger = db.ledger();

        let a = ledger.begin(&script.id, None, TriggeredBy::Schedule).unwrap();
        let b = ledger.begin(&script.id, None, TriggeredBy::Startup).unwrap();
        ledger.finalize(&a.id, &success_outcome()).unwrap();

        let swept = ledger.recover_interrupted().unwrap();
        assert_eq!(swept, 1);

        let b = ledger.get(&b.id).unwrap().unwrap();
        assert_eq!(b.status, ExecutionStatus::Failed);
        assert!(ledger.running().unwrap().is_empty());

        // The already-successful record is untouched.
        let a = ledger.get(&a.id).unwrap().unwrap();
        assert_eq!(a.status, ExecutionStatus::Success);
    }
}
