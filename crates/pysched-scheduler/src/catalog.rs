use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{info, instrument};
use uuid::Uuid;

use pysched_core::types::{Trigger, TriggerConfig};

use crate::cron::CronExpr;
use crate::error::{Result, ScheduleError};

/// Thread-safe store for trigger records — the sole mutator of the
/// `triggers` table.
///
/// Wraps a single SQLite connection in a `Mutex`; the engine, the daemon's
/// startup pass, and any management surface all share one catalog instance.
pub struct TriggerCatalog {
    db: Mutex<Connection>,
}

impl TriggerCatalog {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Create a trigger, validating its configuration and computing the
    /// initial `next_run_at`.
    #[instrument(skip(self, config), fields(script_id, kind = config.kind()))]
    pub fn create(
        &self,
        script_id: &str,
        config: TriggerConfig,
        enabled: bool,
    ) -> Result<Trigger> {
        let now = Utc::now();
        let next_run = initial_next_run(&config, now)?;

        let db = self.db.lock().unwrap();
        let script_exists: bool = db
            .query_row(
                "SELECT 1 FROM scripts WHERE id = ?1",
                [script_id],
                |_| Ok(true),
            )
            .unwrap_or(false);
        if !script_exists {
            return Err(ScheduleError::ScriptNotFound {
                id: script_id.to_string(),
            });
        }

        let id = Uuid::new_v4().to_string();
        let now_str = now.to_rfc3339();
        let config_json = serde_json::to_string(&config)?;
        let next_str = next_run.map(|dt| dt.to_rfc3339());

        db.execute(
            "INSERT INTO triggers
             (id, script_id, config, enabled, created_at, last_triggered_at, next_run_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6)",
            rusqlite::params![id, script_id, config_json, enabled as i64, now_str, next_str],
        )?;

        info!(trigger_id = %id, kind = config.kind(), "trigger created");
        Ok(Trigger {
            id,
            script_id: script_id.to_string(),
            config,
            enabled,
            created_at: now_str,
            last_triggered_at: None,
            next_run_at: next_str,
        })
    }

    /// Retrieve a trigger by id, `None` when it does not exist.
    pub fn get(&self, id: &str) -> Result<Option<Trigger>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!("SELECT {TRIGGER_COLUMNS} FROM triggers WHERE id = ?1"),
            [id],
            row_to_trigger,
        ) {
            Ok(t) => Ok(Some(t)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(ScheduleError::Database(e)),
        }
    }

    /// All triggers belonging to one script.
    pub fn list_for_script(&self, script_id: &str) -> Result<Vec<Trigger>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {TRIGGER_COLUMNS} FROM triggers
             WHERE script_id = ?1 ORDER BY created_at"
        ))?;
        let rows = stmt.query_map([script_id], row_to_trigger)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Interval/cron triggers eligible for the due-scan: trigger enabled AND
    /// owning script enabled.
    pub fn list_due_candidates(&self) -> Result<Vec<Trigger>> {
        Ok(self
            .list_enabled()?
            .into_iter()
            .filter(|t| t.config.is_schedulable())
            .collect())
    }

    /// Enabled startup triggers of enabled scripts, for the once-per-start
    /// pass.
    pub fn list_startup(&self) -> Result<Vec<Trigger>> {
        Ok(self
            .list_enabled()?
            .into_iter()
            .filter(|t| t.config == TriggerConfig::Startup)
            .collect())
    }

    /// Enable or disable a trigger.
    #[instrument(skip(self))]
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE triggers SET enabled = ?1 WHERE id = ?2",
            rusqlite::params![enabled as i64, id],
        )?;
        if n == 0 {
            return Err(ScheduleError::TriggerNotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Remove a trigger. Execution records keep their `trigger_id` value.
    #[instrument(skip(self))]
    pub fn delete(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute("DELETE FROM triggers WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(ScheduleError::TriggerNotFound { id: id.to_string() });
        }
        info!(trigger_id = %id, "trigger removed");
        Ok(())
    }

    /// Atomically claim a due trigger: commit `last_triggered_at = now` and
    /// the post-firing `next_run_at` in one conditional update.
    ///
    /// The condition compares `last_triggered_at` against the value the
    /// caller observed (`IS`, so NULL compares equal) — a concurrent claimant
    /// that fired first changes the column, this update then matches zero
    /// rows, and the occurrence is not dispatched twice. Returns `true` when
    /// the claim won.
    #[instrument(skip(self, trigger), fields(trigger_id = %trigger.id))]
    pub fn claim(
        &self,
        trigger: &Trigger,
        now: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE triggers SET last_triggered_at = ?1, next_run_at = ?2
             WHERE id = ?3 AND enabled = 1 AND last_triggered_at IS ?4",
            rusqlite::params![
                now.to_rfc3339(),
                next_run.map(|dt| dt.to_rfc3339()),
                trigger.id,
                trigger.last_triggered_at,
            ],
        )?;
        Ok(n > 0)
    }

    fn list_enabled(&self) -> Result<Vec<Trigger>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {TRIGGER_COLUMNS_QUALIFIED} FROM triggers t
             JOIN scripts s ON t.script_id = s.id
             WHERE t.enabled = 1 AND s.enabled = 1"
        ))?;
        let rows = stmt.query_map([], row_to_trigger)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

/// Initial `next_run_at` committed at creation time. Also where config
/// validation happens — malformed triggers never reach the table.
fn initial_next_run(
    config: &TriggerConfig,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    match config {
        TriggerConfig::Interval { seconds } => {
            if *seconds == 0 {
                return Err(ScheduleError::InvalidSchedule(
                    "interval seconds must be positive".into(),
                ));
            }
            Ok(Some(now + chrono::Duration::seconds(*seconds as i64)))
        }
        TriggerConfig::Cron { expression } => {
            let expr = CronExpr::parse(expression)?;
            Ok(expr.next_after(now))
        }
        // Startup fires on the next daemon start; "now" doubles as a
        // human-readable hint of immediacy for listing surfaces.
        TriggerConfig::Startup => Ok(Some(now)),
        TriggerConfig::Manual => Ok(None),
    }
}

const TRIGGER_COLUMNS: &str =
    "id, script_id, config, enabled, created_at, last_triggered_at, next_run_at";
const TRIGGER_COLUMNS_QUALIFIED: &str =
    "t.id, t.script_id, t.config, t.enabled, t.created_at, t.last_triggered_at, t.next_run_at";

/// Map a SQLite row (in `TRIGGER_COLUMNS` order) to a `Trigger`.
fn row_to_trigger(row: &rusqlite::Row<'_>) -> rusqlite::Result<Trigger> {
    let config_json: String = row.get(2)?;
    let config = serde_json::from_str(&config_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })?;

    Ok(Trigger {
        id: row.get(0)?,
        script_id: row.get(1)?,
        config,
        enabled: row.get::<_, i64>(3)? != 0,
        created_at: row.get(4)?,
        last_triggered_at: row.get(5)?,
        next_run_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use pysched_store::{NewScript, ScriptStore};

    struct TestDb {
        path: std::path::PathBuf,
    }

    impl TestDb {
        fn new() -> Self {
            let path = std::env::temp_dir().join(format!(
                "pysched-catalog-test-{}.db",
                Uuid::new_v4()
            ));
            let conn = Connection::open(&path).unwrap();
            pysched_store::db::init_db(&conn).unwrap();
            init_db(&conn).unwrap();
            Self { path }
        }

        fn open(&self) -> Connection {
            Connection::open(&self.path).unwrap()
        }
    }

    impl Drop for TestDb {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    fn make_script(db: &TestDb, enabled: bool) -> String {
        let scripts = ScriptStore::new(db.open());
        let mut new = NewScript::new("Catalog Test", "print(1)");
        new.enabled = enabled;
        scripts.create(new).unwrap().id
    }

    #[test]
    fn create_validates_config() {
        let db = TestDb::new();
        let script_id = make_script(&db, true);
        let catalog = TriggerCatalog::new(db.open());

        assert!(matches!(
            catalog.create(&script_id, TriggerConfig::Interval { seconds: 0 }, true),
            Err(ScheduleError::InvalidSchedule(_))
        ));
        assert!(matches!(
            catalog.create(
                &script_id,
                TriggerConfig::Cron {
                    expression: "60 * * * *".into()
                },
                true,
            ),
            Err(ScheduleError::InvalidCron { .. })
        ));
        assert!(matches!(
            catalog.create("missing", TriggerConfig::Manual, true),
            Err(ScheduleError::ScriptNotFound { .. })
        ));
    }

    #[test]
    fn create_sets_initial_next_run() {
        let db = TestDb::new();
        let script_id = make_script(&db, true);
        let catalog = TriggerCatalog::new(db.open());

        let interval = catalog
            .create(&script_id, TriggerConfig::Interval { seconds: 60 }, true)
            .unwrap();
        assert!(interval.next_run_at.is_some());
        assert!(interval.last_triggered_at.is_none());

        let manual = catalog
            .create(&script_id, TriggerConfig::Manual, true)
            .unwrap();
        assert!(manual.next_run_at.is_none());
    }

    #[test]
    fn due_candidates_exclude_disabled_and_nonschedulable() {
        let db = TestDb::new();
        let enabled_script = make_script(&db, true);
        let disabled_script = make_script(&db, false);
        let catalog = TriggerCatalog::new(db.open());

        catalog
            .create(&enabled_script, TriggerConfig::Interval { seconds: 60 }, true)
            .unwrap();
        catalog
            .create(&enabled_script, TriggerConfig::Manual, true)
            .unwrap();
        catalog
            .create(&enabled_script, TriggerConfig::Startup, true)
            .unwrap();
        catalog
            .create(&enabled_script, TriggerConfig::Interval { seconds: 60 }, false)
            .unwrap();
        catalog
            .create(&disabled_script, TriggerConfig::Interval { seconds: 60 }, true)
            .unwrap();

        let candidates = catalog.list_due_candidates().unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].script_id, enabled_script);

        let startup = catalog.list_startup().unwrap();
        assert_eq!(startup.len(), 1);
    }

    #[test]
    fn claim_wins_once_per_observed_state() {
        let db = TestDb::new();
        let script_id = make_script(&db, true);
        let catalog = TriggerCatalog::new(db.open());

        let trigger = catalog
            .create(&script_id, TriggerConfig::Interval { seconds: 30 }, true)
            .unwrap();
        let now = Utc::now();
        let next = now + chrono::Duration::seconds(30);

        // First claim against the observed (NULL) state wins.
        assert!(catalog.claim(&trigger, now, Some(next)).unwrap());
        // A second claimant still holding the stale read loses.
        assert!(!catalog.claim(&trigger, now, Some(next)).unwrap());

        let stored = catalog.get(&trigger.id).unwrap().unwrap();
        assert!(stored.last_triggered_at.is_some());
        assert_eq!(
            stored.next_run_at.as_deref(),
            Some(next.to_rfc3339().as_str())
        );
    }

    #[test]
    fn claim_refuses_disabled_trigger() {
        let db = TestDb::new();
        let script_id = make_script(&db, true);
        let catalog = TriggerCatalog::new(db.open());

        let trigger = catalog
            .create(&script_id, TriggerConfig::Interval { seconds: 30 }, true)
            .unwrap();
        catalog.set_enabled(&trigger.id, false).unwrap();

        assert!(!catalog.claim(&trigger, Utc::now(), None).unwrap());
    }
}
