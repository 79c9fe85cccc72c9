use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind-specific scheduling configuration, validated exhaustively at
/// trigger-creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerConfig {
    /// Fire whenever at least `seconds` have elapsed since the last firing.
    Interval { seconds: u64 },

    /// Fire according to a five-field cron expression (UTC).
    Cron { expression: String },

    /// Fire exactly once per daemon start.
    Startup,

    /// Never fired by the dispatch loop; only via explicit request.
    Manual,
}

impl TriggerConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            TriggerConfig::Interval { .. } => "interval",
            TriggerConfig::Cron { .. } => "cron",
            TriggerConfig::Startup => "startup",
            TriggerConfig::Manual => "manual",
        }
    }

    /// Whether the periodic dispatch loop evaluates this trigger at all.
    pub fn is_schedulable(&self) -> bool {
        matches!(
            self,
            TriggerConfig::Interval { .. } | TriggerConfig::Cron { .. }
        )
    }
}

/// What caused an execution to be enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    Schedule,
    Manual,
    Url,
    Startup,
}

impl fmt::Display for TriggeredBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggeredBy::Schedule => "schedule",
            TriggeredBy::Manual => "manual",
            TriggeredBy::Url => "url",
            TriggeredBy::Startup => "startup",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TriggeredBy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "schedule" => Ok(TriggeredBy::Schedule),
            "manual" => Ok(TriggeredBy::Manual),
            "url" => Ok(TriggeredBy::Url),
            "startup" => Ok(TriggeredBy::Startup),
            other => Err(format!("unknown trigger source: {other}")),
        }
    }
}

/// Lifecycle state of one execution attempt.
///
/// `Running` is the only non-terminal state; a record transitions out of it
/// exactly once (or is swept to `Failed` by startup recovery after a crash).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(ExecutionStatus::Running),
            "success" => Ok(ExecutionStatus::Success),
            "failed" => Ok(ExecutionStatus::Failed),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// Which terminal states a script's email notifications cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailFilter {
    All,
    Success,
    Failure,
}

impl EmailFilter {
    /// True when `status` should produce a notification under this filter.
    pub fn matches(&self, status: ExecutionStatus) -> bool {
        match self {
            EmailFilter::All => status.is_terminal(),
            EmailFilter::Success => status == ExecutionStatus::Success,
            EmailFilter::Failure => status == ExecutionStatus::Failed,
        }
    }
}

impl fmt::Display for EmailFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EmailFilter::All => "all",
            EmailFilter::Success => "success",
            EmailFilter::Failure => "failure",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for EmailFilter {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "all" => Ok(EmailFilter::All),
            "success" => Ok(EmailFilter::Success),
            "failure" => Ok(EmailFilter::Failure),
            other => Err(format!("unknown email filter: {other}")),
        }
    }
}

/// A persisted script record.
///
/// The scheduling core reads scripts and writes back `execution_count`,
/// `success_count`, and `last_executed_at` after each run; everything else
/// is owned by the CRUD layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    /// UUID v4 string — primary key.
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    /// Filesystem-safe name, unique within the folder.
    pub slug: String,
    /// Optional folder path segment for workspace layout.
    pub folder: Option<String>,
    pub description: String,
    /// The Python source text.
    pub source: String,
    /// Requested interpreter version, e.g. "3.12".
    pub python_version: String,
    /// requirements.txt content for the isolated runtime.
    pub requirements: String,
    /// Variables injected over the daemon's environment at run time.
    pub env_vars: BTreeMap<String, String>,
    pub enabled: bool,
    pub email_notifications: bool,
    /// Comma-separated recipient list.
    pub email_recipients: String,
    pub email_filter: EmailFilter,
    /// ISO-8601 creation timestamp.
    pub created_at: String,
    pub updated_at: String,
    pub last_executed_at: Option<String>,
    pub execution_count: u32,
    pub success_count: u32,
}

/// A persisted trigger record. Belongs to exactly one script.
///
/// Timestamps are kept as the stored ISO-8601 strings: the claim protocol
/// compares `last_triggered_at` byte-for-byte against the database, so the
/// row struct must carry exactly what was read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    /// UUID v4 string — primary key.
    pub id: String,
    pub script_id: String,
    pub config: TriggerConfig,
    pub enabled: bool,
    pub created_at: String,
    /// ISO-8601 instant of the most recent firing, if any.
    pub last_triggered_at: Option<String>,
    /// ISO-8601 next planned occurrence. Always strictly after
    /// `last_triggered_at` when both are present; never set for Manual.
    pub next_run_at: Option<String>,
}

impl Trigger {
    /// Parse a stored timestamp column into a UTC instant.
    pub fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// A persisted execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// UUID v4 string — primary key.
    pub id: String,
    pub script_id: String,
    pub trigger_id: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub duration_ms: Option<u64>,
    pub status: ExecutionStatus,
    pub exit_code: Option<i32>,
    /// Captured output, truncated to the configured bound before persisting.
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub triggered_by: TriggeredBy,
}

/// One unit of work on the dispatch → worker queue.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub script_id: String,
    /// Present for scheduled/startup firings, absent for manual/URL runs.
    pub trigger_id: Option<String>,
    pub triggered_by: TriggeredBy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_config_json_is_tagged_by_kind() {
        let json = serde_json::to_string(&TriggerConfig::Interval { seconds: 30 }).unwrap();
        assert!(json.contains(r#""kind":"interval""#));
        assert!(json.contains(r#""seconds":30"#));

        let back: TriggerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TriggerConfig::Interval { seconds: 30 });
    }

    #[test]
    fn manual_and_startup_are_not_schedulable() {
        assert!(!TriggerConfig::Manual.is_schedulable());
        assert!(!TriggerConfig::Startup.is_schedulable());
        assert!(TriggerConfig::Interval { seconds: 5 }.is_schedulable());
        assert!(TriggerConfig::Cron {
            expression: "* * * * *".into()
        }
        .is_schedulable());
    }

    #[test]
    fn email_filter_matching() {
        assert!(EmailFilter::All.matches(ExecutionStatus::Success));
        assert!(EmailFilter::All.matches(ExecutionStatus::Failed));
        assert!(!EmailFilter::All.matches(ExecutionStatus::Running));
        assert!(EmailFilter::Success.matches(ExecutionStatus::Success));
        assert!(!EmailFilter::Success.matches(ExecutionStatus::Failed));
        assert!(EmailFilter::Failure.matches(ExecutionStatus::Failed));
        assert!(!EmailFilter::Failure.matches(ExecutionStatus::Success));
    }

    #[test]
    fn status_roundtrips_through_strings() {
        for status in ["running", "success", "failed"] {
            let parsed: ExecutionStatus = status.parse().unwrap();
            assert_eq!(parsed.to_string(), status);
        }
        assert!("bogus".parse::<ExecutionStatus>().is_err());
    }
}
