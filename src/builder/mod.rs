//! Index Builder collaborator
//!
//! The builder is a black box: it runs in a build workspace holding `repo/`
//! (the artifacts), `metadata/` and `config.yml`, and either leaves a signed
//! index plus per-package detail pages under `repo/` or fails. Whatever it
//! leaves behind on failure is discarded with the workspace; the previously
//! committed index is untouched.

mod config_yml;
mod fdroid;
mod workspace;

pub use config_yml::render_config_yml;
pub use fdroid::FdroidServerBuilder;
pub use workspace::{BuildInputs, BuildWorkspace};

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::identity::SigningIdentity;

/// Errors from an index build; recoverable for the orchestrator
#[derive(Debug, Error)]
pub enum IndexBuildError {
    /// The builder ran and reported failure (malformed artifact, bad passphrase)
    #[error("index builder failed: {0}")]
    Builder(String),

    #[error("index builder timed out after {0:?}")]
    Timeout(Duration),

    /// Success was reported but no signed index exists
    #[error("builder produced no signed index at {0}")]
    Unsigned(PathBuf),

    #[error("build workspace: {0}")]
    Workspace(String),

    /// The build succeeded but could not be made authoritative
    #[error("index commit failed: {0}")]
    Commit(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Everything a builder needs for one run
#[derive(Debug, Clone)]
pub struct BuildRequest<'a> {
    pub build_id: &'a str,
    /// Workspace root (`builds/<id>`); the builder's working directory
    pub work_dir: &'a std::path::Path,
    pub identity: &'a SigningIdentity,
    pub timeout: Duration,
    /// Where subprocess output goes
    pub log_path: Option<PathBuf>,
}

/// What a successful build reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    /// Signed index relative to the workspace
    pub signed_index: String,
    pub artifact_count: usize,
}

/// Produces a freshly signed index from a prepared workspace
pub trait IndexBuilder: Send + Sync {
    fn build(&self, request: &BuildRequest<'_>) -> Result<BuildOutput, IndexBuildError>;
}
