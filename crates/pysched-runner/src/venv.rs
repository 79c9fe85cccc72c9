use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, RunnerError};
use crate::workspace::ScriptWorkspace;

/// Time bound on each diagnostic subprocess probe in [`Provisioner::inspect`].
const PROBE_TIMEOUT_SECS: u64 = 10;

/// One installed package, as reported by `pip list --format=json`.
#[derive(Debug, Clone, Deserialize)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
}

/// Diagnostic snapshot of a script's isolated runtime.
#[derive(Debug, Clone, Default)]
pub struct EnvInfo {
    pub exists: bool,
    /// Output of `python --version` inside the venv, e.g. "Python 3.12.4".
    pub python_version: Option<String>,
    pub packages: Vec<InstalledPackage>,
}

/// Creates and synchronises one script's virtualenv.
///
/// All operations are idempotent and slow (seconds) — they belong on a
/// worker, never on the dispatch tick. Callers must serialize operations
/// per script; two provisioners mutating the same workspace concurrently
/// is undefined.
pub struct Provisioner {
    workspace: ScriptWorkspace,
}

impl Provisioner {
    pub fn new(workspace: ScriptWorkspace) -> Self {
        Self { workspace }
    }

    pub fn workspace(&self) -> &ScriptWorkspace {
        &self.workspace
    }

    /// Guarantee the venv exists, creating it with the requested interpreter
    /// version. Falls back to `python3` when `python<version>` is not on the
    /// host. A no-op when the venv is already present.
    #[instrument(skip(self), fields(dir = %self.workspace.dir().display(), python_version))]
    pub async fn ensure(&self, python_version: &str) -> Result<()> {
        tokio::fs::create_dir_all(self.workspace.dir()).await?;

        if self.workspace.venv_exists() {
            debug!("venv already present");
            return Ok(());
        }

        let interpreter = resolve_interpreter(python_version).await;
        info!(%interpreter, "creating virtualenv");

        let output = Command::new(&interpreter)
            .arg("-m")
            .arg("venv")
            .arg(self.workspace.venv_dir())
            .output()
            .await
            .map_err(|e| RunnerError::Provision(format!("cannot launch {interpreter}: {e}")))?;

        if !output.status.success() {
            return Err(RunnerError::Provision(format!(
                "venv creation failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        // Old bundled pips choke on modern wheels; failure here is not
        // fatal — dependency sync will surface any real problem.
        let upgrade = Command::new(self.workspace.pip())
            .args(["install", "--upgrade", "pip"])
            .output()
            .await;
        if let Ok(out) = upgrade {
            if !out.status.success() {
                warn!(
                    stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                    "pip self-upgrade failed"
                );
            }
        }

        Ok(())
    }

    /// Write `requirements.txt` and install the declared dependency set.
    /// Blank requirements are a no-op. Requires a completed [`ensure`].
    ///
    /// [`ensure`]: Provisioner::ensure
    #[instrument(skip(self, requirements), fields(dir = %self.workspace.dir().display()))]
    pub async fn sync(&self, requirements: &str) -> Result<()> {
        if requirements.trim().is_empty() {
            debug!("no requirements to install");
            return Ok(());
        }

        let req_file = self.workspace.requirements_file();
        tokio::fs::write(&req_file, requirements).await?;

        let pip = self.workspace.pip();
        if !pip.exists() {
            return Err(RunnerError::Provision(
                "pip not found in virtualenv — run ensure first".into(),
            ));
        }

        let output = Command::new(&pip)
            .arg("install")
            .arg("-r")
            .arg(&req_file)
            .output()
            .await
            .map_err(|e| RunnerError::Provision(format!("cannot launch pip: {e}")))?;

        if !output.status.success() {
            return Err(RunnerError::Provision(format!(
                "dependency install failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        info!("dependencies installed");
        Ok(())
    }

    /// Report the runtime's state without mutating anything. Each subprocess
    /// probe is time-bounded so a wedged interpreter cannot hang diagnostics.
    #[instrument(skip(self), fields(dir = %self.workspace.dir().display()))]
    pub async fn inspect(&self) -> Result<EnvInfo> {
        if !self.workspace.venv_exists() {
            return Ok(EnvInfo::default());
        }

        let python_version = probe(
            Command::new(self.workspace.python()).arg("--version"),
        )
        .await?
        .map(|out| out.trim().to_string());

        let packages = match probe(
            Command::new(self.workspace.pip()).args(["list", "--format=json"]),
        )
        .await?
        {
            Some(json) => serde_json::from_str(&json).unwrap_or_default(),
            None => Vec::new(),
        };

        Ok(EnvInfo {
            exists: true,
            python_version,
            packages,
        })
    }

    /// Delete the whole workspace (venv, source, requirements).
    pub async fn remove(&self) -> Result<()> {
        if self.workspace.dir().exists() {
            tokio::fs::remove_dir_all(self.workspace.dir()).await?;
            info!(dir = %self.workspace.dir().display(), "workspace removed");
        }
        Ok(())
    }
}

/// Pick `python<version>` when the host has it, `python3` otherwise.
async fn resolve_interpreter(python_version: &str) -> String {
    let versioned = format!("python{python_version}");
    let found = Command::new("which")
        .arg(&versioned)
        .output()
        .await
        .map(|out| out.status.success())
        .unwrap_or(false);

    if found {
        versioned
    } else {
        debug!(requested = %versioned, "interpreter not on host — falling back to python3");
        "python3".to_string()
    }
}

/// Run a probe command under the diagnostic time bound. `Ok(None)` means the
/// command ran but exited non-zero; a timeout is an error.
async fn probe(cmd: &mut Command) -> Result<Option<String>> {
    let result = tokio::time::timeout(
        Duration::from_secs(PROBE_TIMEOUT_SECS),
        cmd.output(),
    )
    .await;

    match result {
        Err(_) => Err(RunnerError::ProbeTimeout {
            secs: PROBE_TIMEOUT_SECS,
        }),
        Ok(Err(e)) => Err(RunnerError::Io(e)),
        Ok(Ok(out)) if out.status.success() => {
            Ok(Some(String::from_utf8_lossy(&out.stdout).to_string()))
        }
        Ok(Ok(_)) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_workspace(name: &str) -> (ScriptWorkspace, PathBuf) {
        let data = std::env::temp_dir().join(format!(
            "pysched-venv-test-{}-{}",
            name,
            uuid::Uuid::new_v4()
        ));
        (ScriptWorkspace::new(&data, None, name), data)
    }

    #[tokio::test]
    async fn inspect_reports_missing_runtime() {
        let (ws, data) = scratch_workspace("missing");
        let info = Provisioner::new(ws).inspect().await.unwrap();
        assert!(!info.exists);
        assert!(info.python_version.is_none());
        assert!(info.packages.is_empty());
        let _ = std::fs::remove_dir_all(data);
    }

    #[tokio::test]
    async fn sync_with_blank_requirements_is_a_noop() {
        let (ws, data) = scratch_workspace("blank");
        let provisioner = Provisioner::new(ws);
        provisioner.sync("").await.unwrap();
        provisioner.sync("   \n  ").await.unwrap();
        // No venv, no requirements file — nothing was written.
        assert!(!provisioner.workspace().requirements_file().exists());
        let _ = std::fs::remove_dir_all(data);
    }

    #[tokio::test]
    async fn sync_without_venv_reports_provision_error() {
        let (ws, data) = scratch_workspace("no-venv");
        std::fs::create_dir_all(ws.dir()).unwrap();
        let provisioner = Provisioner::new(ws);
        let err = provisioner.sync("requests==2.31.0").await.unwrap_err();
        assert!(matches!(err, RunnerError::Provision(_)));
        let _ = std::fs::remove_dir_all(data);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let (ws, data) = scratch_workspace("remove");
        std::fs::create_dir_all(ws.dir()).unwrap();
        let provisioner = Provisioner::new(ws);
        provisioner.remove().await.unwrap();
        provisioner.remove().await.unwrap(); // already gone
        assert!(!provisioner.workspace().dir().exists());
        let _ = std::fs::remove_dir_all(data);
    }
}
