//! Repository directory layout
//!
//! Every path the orchestrator touches is derived from the repository root
//! here, so stores, builds and mirrors agree on where things live.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Paths below a repository root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLayout {
    root: PathBuf,
}

impl RepoLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Signing identity directory
    pub fn identity_dir(&self) -> PathBuf {
        self.root.join("identity")
    }

    /// Artifact Store
    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("artifacts")
    }

    /// Metadata Store
    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join("metadata")
    }

    /// Index builder configuration
    pub fn builder_config(&self) -> PathBuf {
        self.root.join("config.yml")
    }

    /// Landing page source
    pub fn landing_page(&self) -> PathBuf {
        self.root.join("site").join("index.html")
    }

    /// Build workspaces
    pub fn builds_dir(&self) -> PathBuf {
        self.root.join("builds")
    }

    /// Workspace of one build
    pub fn build_dir(&self, build_id: &str) -> PathBuf {
        self.builds_dir().join(build_id)
    }

    /// Pointer to the authoritative index
    pub fn current_pointer(&self) -> PathBuf {
        self.root.join("current.json")
    }

    /// Cycle state record
    pub fn cycle_state(&self) -> PathBuf {
        self.root.join("state").join("cycle_state.json")
    }

    /// Subprocess logs
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Advisory lock files
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join(".locks")
    }
}

/// Write `contents` to `path` unless it already holds exactly those bytes.
///
/// Writes go through a temporary file and a rename. `private` files are
/// created owner read/write only. Returns true when the file was written.
pub fn write_if_changed(path: &Path, contents: &[u8], private: bool) -> io::Result<bool> {
    match fs::read(path) {
        Ok(existing) if existing == contents => return Ok(false),
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp_path = path.with_extension("tmp");
    {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            if private {
                options.mode(0o600);
            }
        }
        #[cfg(not(unix))]
        let _ = private;
        let mut file = options.open(&temp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    fs::rename(&temp_path, path)?;
    Ok(true)
}
