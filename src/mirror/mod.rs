//! Serving mirrors
//!
//! A mirror receives the published tree of one build and must end up holding
//! exactly that tree: new files pushed, stale files pruned. A sync either
//! completes or fails as a whole; retries start over from the beginning.

mod local;
mod object_store;

pub use local::LocalDirMirror;
pub use object_store::ObjectStoreMirror;

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use repo_tree::ExcludeRules;
use thiserror::Error;

use crate::config::{ConfigError, MirrorTarget, Settings};

/// Errors from a mirror sync; recoverable, per mirror
#[derive(Debug, Error)]
pub enum MirrorSyncError {
    /// The target could not be reached or written
    #[error("mirror unreachable: {0}")]
    Unreachable(String),

    /// The sync tool ran and failed
    #[error("sync command failed: {0}")]
    Command(String),

    #[error("sync timed out after {0:?}")]
    Timeout(Duration),

    #[error("tree error: {0}")]
    Tree(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// One publish to one mirror
#[derive(Debug, Clone)]
pub struct SyncRequest<'a> {
    pub build_id: &'a str,
    /// Published tree of the build (`builds/<id>/repo`)
    pub tree: &'a Path,
    /// Landing page copied to the mirror root
    pub landing_page: &'a Path,
    pub timeout: Duration,
    /// Directory for subprocess logs
    pub log_dir: Option<&'a Path>,
}

impl SyncRequest<'_> {
    pub(crate) fn log_path(&self, mirror: &str) -> Option<PathBuf> {
        self.log_dir
            .map(|dir| dir.join(format!("mirror-{}-{}.log", mirror, self.build_id)))
    }
}

/// What a successful sync did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Files in the published tree
    pub files: usize,
    pub bytes: u64,
    /// Reconciliation counts, when the mirror can compute them
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unchanged: Option<usize>,
    pub duration_ms: u64,
}

/// A serving surface kept in sync with the current index
pub trait Mirror: Send + Sync {
    fn name(&self) -> &str;

    fn sync(&self, request: &SyncRequest<'_>) -> Result<SyncReport, MirrorSyncError>;
}

/// Mirrors configured in settings, explicit ones first
pub fn from_settings(settings: &Settings) -> Result<Vec<Box<dyn Mirror>>, ConfigError> {
    let mut mirrors: Vec<Box<dyn Mirror>> = Vec::new();

    for mirror in settings.all_mirrors() {
        let rules = ExcludeRules::with_patterns(mirror.exclude.as_slice()).map_err(|e| {
            ConfigError::ValidationError(format!("mirror {}: {}", mirror.name, e))
        })?;

        match mirror.target {
            MirrorTarget::Local { path } => mirrors.push(Box::new(LocalDirMirror::new(
                mirror.name,
                settings.resolve(&path),
                rules,
            ))),
            MirrorTarget::ObjectStore {
                provider,
                bucket,
                prefix,
            } => mirrors.push(Box::new(ObjectStoreMirror::new(
                mirror.name,
                provider,
                bucket,
                prefix,
                rules,
            ))),
        }
    }

    Ok(mirrors)
}
