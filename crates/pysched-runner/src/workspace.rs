use std::path::{Path, PathBuf};

/// Path layout for one script's isolated workspace.
///
/// Pure path arithmetic — nothing here touches the filesystem. The slug is
/// assumed filesystem-safe (the store derives and validates it).
#[derive(Debug, Clone)]
pub struct ScriptWorkspace {
    dir: PathBuf,
    slug: String,
}

impl ScriptWorkspace {
    pub fn new(data_path: &Path, folder: Option<&str>, slug: &str) -> Self {
        let mut dir = data_path.join("scripts");
        if let Some(folder) = folder {
            dir.push(folder);
        }
        dir.push(slug);
        Self {
            dir,
            slug: slug.to_string(),
        }
    }

    /// The workspace directory — also the working directory for runs.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn venv_dir(&self) -> PathBuf {
        self.dir.join(".venv")
    }

    /// Where the source of record is written before each run.
    pub fn script_file(&self) -> PathBuf {
        self.dir.join(format!("{}.py", self.slug))
    }

    pub fn requirements_file(&self) -> PathBuf {
        self.dir.join("requirements.txt")
    }

    /// The venv's interpreter.
    pub fn python(&self) -> PathBuf {
        self.venv_dir().join("bin").join("python")
    }

    pub fn pip(&self) -> PathBuf {
        self.venv_dir().join("bin").join("pip")
    }

    /// True when the isolated runtime has been created.
    pub fn venv_exists(&self) -> bool {
        self.venv_dir().is_dir()
    }
}
