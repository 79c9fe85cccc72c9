use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Dispatch tick period when nothing else is configured.
pub const DEFAULT_TICK_SECS: u64 = 60;
/// Hard wall-clock limit for one script execution.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
/// Persisted stdout/stderr cap per execution record.
pub const DEFAULT_OUTPUT_MAX_CHARS: usize = 30_000;

/// Top-level config (pysched.toml + PYSCHED_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PyschedConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// SMTP settings for execution notifications. Absent = email disabled.
    pub email: Option<EmailConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Seconds between dispatch ticks.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Number of execution workers draining the queue.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Bounded depth of the dispatch → worker queue.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// How long shutdown waits for in-flight executions before exiting.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            workers: default_workers(),
            queue_depth: default_queue_depth(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Root directory for per-script workspaces (`<path>/scripts/...`).
    #[serde(default = "default_data_path")]
    pub path: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            path: default_data_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Wall-clock timeout per execution, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Maximum characters of stdout/stderr persisted per record.
    #[serde(default = "default_output_max_chars")]
    pub output_max_chars: usize,
    /// Provisioning retry budget (attempts, not re-runs of the script).
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    /// Base of the exponential backoff between provisioning retries.
    #[serde(default = "default_retry_base_secs")]
    pub retry_base_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            output_max_chars: default_output_max_chars(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_secs: default_retry_base_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Python version used when a script does not request one.
    #[serde(default = "default_python")]
    pub default_python: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_python: default_python(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_server: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    #[serde(default = "default_from_email")]
    pub from_email: String,
}

fn default_tick_secs() -> u64 {
    DEFAULT_TICK_SECS
}
fn default_workers() -> usize {
    4
}
fn default_queue_depth() -> usize {
    256
}
fn default_shutdown_grace_secs() -> u64 {
    30
}
fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
fn default_output_max_chars() -> usize {
    DEFAULT_OUTPUT_MAX_CHARS
}
fn default_retry_max_attempts() -> u32 {
    3
}
fn default_retry_base_secs() -> u64 {
    60
}
fn default_python() -> String {
    "3.12".to_string()
}
fn default_smtp_port() -> u16 {
    587
}
fn default_from_email() -> String {
    "pysched@localhost".to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.pysched/pysched.db", home)
}
fn default_data_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.pysched/data", home)
}

impl PyschedConfig {
    /// Load config from a TOML file with PYSCHED_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.pysched/pysched.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: PyschedConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("PYSCHED_").split("_"))
            .extract()
            .map_err(|e| crate::error::PyschedError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.pysched/pysched.toml", home)
}
