use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::Connection;
use tracing::{info, instrument};
use uuid::Uuid;

use pysched_core::types::{EmailFilter, Script};
use pysched_core::validate;

use crate::error::{Result, StoreError};

/// Input for [`ScriptStore::create`]. Everything beyond name and source has
/// a sensible default so tests and the CRUD layer only set what they need.
#[derive(Debug, Clone)]
pub struct NewScript {
    pub name: String,
    pub folder: Option<String>,
    pub description: String,
    pub source: String,
    pub python_version: String,
    pub requirements: String,
    pub env_vars: BTreeMap<String, String>,
    pub enabled: bool,
    pub email_notifications: bool,
    pub email_recipients: String,
    pub email_filter: EmailFilter,
}

impl NewScript {
    pub fn new(name: &str, source: &str) -> Self {
        Self {
            name: name.to_string(),
            folder: None,
            description: String::new(),
            source: source.to_string(),
            python_version: "3.12".to_string(),
            requirements: String::new(),
            env_vars: BTreeMap::new(),
            enabled: true,
            email_notifications: false,
            email_recipients: String::new(),
            email_filter: EmailFilter::All,
        }
    }
}

/// Thread-safe store for script records.
///
/// Wraps a single SQLite connection in a `Mutex` — sufficient for the
/// single-daemon target. Counters are written by the [`crate::ExecutionLedger`],
/// not here.
pub struct ScriptStore {
    db: Mutex<Connection>,
}

impl ScriptStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Create a script, deriving a folder-unique slug from its name.
    ///
    /// Validates env-var names, requirements syntax, and the interpreter
    /// version before touching the database.
    #[instrument(skip(self, new), fields(name = %new.name))]
    pub fn create(&self, new: NewScript) -> Result<Script> {
        validate::validate_env_vars(&new.env_vars)?;
        validate::validate_requirements(&new.requirements)?;
        if !validate::is_valid_python_version(&new.python_version) {
            return Err(StoreError::Invalid(format!(
                "unsupported python version: {}",
                new.python_version
            )));
        }
        if new.source.trim().is_empty() {
            return Err(StoreError::Invalid("script source is empty".into()));
        }

        let db = self.db.lock().unwrap();
        let slug = unique_slug(&db, &validate::safe_slug(&new.name), new.folder.as_deref())?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let env_json = serde_json::to_string(&new.env_vars)?;

        db.execute(
            "INSERT INTO scripts
             (id, name, slug, folder, description, source, python_version,
              requirements, env_vars, enabled, email_notifications,
              email_recipients, email_filter, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?14)",
            rusqlite::params![
                id,
                new.name,
                slug,
                new.folder,
                new.description,
                new.source,
                new.python_version,
                new.requirements,
                env_json,
                new.enabled as i64,
                new.email_notifications as i64,
                new.email_recipients,
                new.email_filter.to_string(),
                now,
            ],
        )?;

        info!(script_id = %id, %slug, "script created");
        self.get_locked(&db, &id)?
            .ok_or(StoreError::ScriptNotFound { id })
    }

    /// Retrieve a script by id, `None` when it does not exist.
    pub fn get(&self, id: &str) -> Result<Option<Script>> {
        let db = self.db.lock().unwrap();
        self.get_locked(&db, id)
    }

    /// List all scripts ordered by creation time.
    pub fn list(&self) -> Result<Vec<Script>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {SCRIPT_COLUMNS} FROM scripts ORDER BY created_at"
        ))?;
        let rows = stmt.query_map([], row_to_script)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Enable or disable a script. Disabled scripts are never dispatched.
    #[instrument(skip(self))]
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let db = self.db.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let n = db.execute(
            "UPDATE scripts SET enabled = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![enabled as i64, now, id],
        )?;
        if n == 0 {
            return Err(StoreError::ScriptNotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Replace the source text (the argument of record for future runs).
    #[instrument(skip(self, source))]
    pub fn update_source(&self, id: &str, source: &str) -> Result<()> {
        if source.trim().is_empty() {
            return Err(StoreError::Invalid("script source is empty".into()));
        }
        let db = self.db.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let n = db.execute(
            "UPDATE scripts SET source = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![source, now, id],
        )?;
        if n == 0 {
            return Err(StoreError::ScriptNotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Delete a script row. Execution history cascades; the workspace
    /// directory is the provisioner's to remove.
    #[instrument(skip(self))]
    pub fn delete(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute("DELETE FROM scripts WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(StoreError::ScriptNotFound { id: id.to_string() });
        }
        info!(script_id = %id, "script deleted");
        Ok(())
    }

    fn get_locked(&self, db: &Connection, id: &str) -> Result<Option<Script>> {
        match db.query_row(
            &format!("SELECT {SCRIPT_COLUMNS} FROM scripts WHERE id = ?1"),
            [id],
            row_to_script,
        ) {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }
}

/// Suffix the slug with -2, -3, … until it is unique within the folder.
fn unique_slug(db: &Connection, base: &str, folder: Option<&str>) -> Result<String> {
    let folder_key = folder.unwrap_or("");
    let mut candidate = base.to_string();
    let mut counter = 1u32;

    loop {
        let taken: bool = db
            .query_row(
                "SELECT 1 FROM scripts WHERE slug = ?1 AND coalesce(folder, '') = ?2",
                rusqlite::params![candidate, folder_key],
                |_| Ok(true),
            )
            .map(|_| true)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(false),
                other => Err(StoreError::Database(other)),
            })?;

        if !taken {
            return Ok(candidate);
        }
        counter += 1;
        candidate = format!("{base}-{counter}");
    }
}

const SCRIPT_COLUMNS: &str = "id, name, slug, folder, description, source, python_version, \
     requirements, env_vars, enabled, email_notifications, email_recipients, \
     email_filter, created_at, updated_at, last_executed_at, execution_count, success_count";

/// Map a SQLite row (in `SCRIPT_COLUMNS` order) to a `Script`.
fn row_to_script(row: &rusqlite::Row<'_>) -> rusqlite::Result<Script> {
    let env_json: String = row.get(8)?;
    // A malformed stored map degrades to "no extra variables" rather than
    // making the whole script unreadable.
    let env_vars = serde_json::from_str(&env_json).unwrap_or_default();
    let filter_str: String = row.get(12)?;
    let email_filter = filter_str.parse().unwrap_or(EmailFilter::All);

    Ok(Script {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        folder: row.get(3)?,
        description: row.get(4)?,
        source: row.get(5)?,
        python_version: row.get(6)?,
        requirements: row.get(7)?,
        env_vars,
        enabled: row.get::<_, i64>(9)? != 0,
        email_notifications: row.get::<_, i64>(10)? != 0,
        email_recipients: row.get(11)?,
        email_filter,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
        last_executed_at: row.get(15)?,
        execution_count: row.get::<_, i64>(16)? as u32,
        success_count: row.get::<_, i64>(17)? as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn open_store() -> ScriptStore {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        ScriptStore::new(conn)
    }

    #[test]
    fn create_derives_slug_from_name() {
        let store = open_store();
        let script = store
            .create(NewScript::new("My Nightly Backup", "print('hi')"))
            .unwrap();
        assert_eq!(script.slug, "my-nightly-backup");
        assert!(script.enabled);
        assert_eq!(script.execution_count, 0);
    }

    #[test]
    fn duplicate_names_get_suffixed_slugs() {
        let store = open_store();
        let a = store.create(NewScript::new("Report", "print(1)")).unwrap();
        let b = store.create(NewScript::new("Report", "print(2)")).unwrap();
        let c = store.create(NewScript::new("Report", "print(3)")).unwrap();
        assert_eq!(a.slug, "report");
        assert_eq!(b.slug, "report-2");
        assert_eq!(c.slug, "report-3");
    }

    #[test]
    fn same_slug_allowed_in_different_folders() {
        let store = open_store();
        let mut new = NewScript::new("Report", "print(1)");
        new.folder = Some("daily".into());
        let a = store.create(new).unwrap();

        let mut new = NewScript::new("Report", "print(2)");
        new.folder = Some("weekly".into());
        let b = store.create(new).unwrap();

        assert_eq!(a.slug, "report");
        assert_eq!(b.slug, "report");
    }

    #[test]
    fn create_rejects_bad_env_var_names() {
        let store = open_store();
        let mut new = NewScript::new("Env Test", "print(1)");
        new.env_vars.insert("not-valid".into(), "x".into());
        assert!(matches!(
            store.create(new),
            Err(StoreError::Invalid(_))
        ));
    }

    #[test]
    fn create_rejects_empty_source() {
        let store = open_store();
        assert!(store.create(NewScript::new("Empty", "   ")).is_err());
    }

    #[test]
    fn env_vars_roundtrip_through_json_column() {
        let store = open_store();
        let mut new = NewScript::new("Env Test", "print(1)");
        new.env_vars.insert("API_KEY".into(), "secret".into());
        new.env_vars.insert("REGION".into(), "eu-west-1".into());
        let created = store.create(new).unwrap();

        let loaded = store.get(&created.id).unwrap().unwrap();
        assert_eq!(loaded.env_vars.get("API_KEY").unwrap(), "secret");
        assert_eq!(loaded.env_vars.len(), 2);
    }

    #[test]
    fn set_enabled_toggles_and_missing_id_errors() {
        let store = open_store();
        let script = store.create(NewScript::new("Toggle", "print(1)")).unwrap();
        store.set_enabled(&script.id, false).unwrap();
        assert!(!store.get(&script.id).unwrap().unwrap().enabled);

        assert!(matches!(
            store.set_enabled("nope", true),
            Err(StoreError::ScriptNotFound { .. })
        ));
    }
}
