//! Build workspace retention
//!
//! Committed builds (those with an index record) are kept newest-first up to
//! `keep_builds`; the current build is never removed. Builds without a record
//! are failed attempts and are removed unless `keep_failed_builds` is set.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::{debug, warn};

use super::INDEX_RECORD_FILE;
use crate::layout::RepoLayout;

/// Retention policy for build workspaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Committed builds to keep, including the current one
    pub keep_builds: usize,
    /// Keep workspaces of failed builds for inspection
    #[serde(default)]
    pub keep_failed_builds: bool,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_builds: 3,
            keep_failed_builds: false,
        }
    }
}

/// Result of pruning build workspaces
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildGcResult {
    pub scanned: usize,
    pub deleted: usize,
    /// Errors encountered (non-fatal)
    pub errors: Vec<String>,
}

struct BuildInfo {
    id: String,
    path: PathBuf,
    committed: bool,
}

/// Remove builds beyond the policy. `current` is always kept.
pub fn prune_builds(
    layout: &RepoLayout,
    policy: &RetentionPolicy,
    current: Option<&str>,
) -> io::Result<BuildGcResult> {
    let mut result = BuildGcResult::default();

    let entries = match fs::read_dir(layout.builds_dir()) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(result),
        Err(e) => return Err(e),
    };

    let mut builds = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let path = entry.path();
        builds.push(BuildInfo {
            id: entry.file_name().to_string_lossy().into_owned(),
            committed: path.join(INDEX_RECORD_FILE).is_file(),
            path,
        });
    }
    result.scanned = builds.len();

    // Build ids are ULIDs: lexicographic order is creation order
    builds.sort_by(|a, b| b.id.cmp(&a.id));

    let mut kept = 0;
    for build in &builds {
        let is_current = current == Some(build.id.as_str());

        let delete = if is_current {
            false
        } else if build.committed {
            kept >= policy.keep_builds.saturating_sub(usize::from(current.is_some()))
        } else {
            !policy.keep_failed_builds
        };

        if !delete {
            if build.committed && !is_current {
                kept += 1;
            }
            continue;
        }

        debug!(build_id = %build.id, committed = build.committed, "pruning build");
        match fs::remove_dir_all(&build.path) {
            Ok(()) => result.deleted += 1,
            Err(e) => {
                warn!(build_id = %build.id, error = %e, "failed to prune build");
                result
                    .errors
                    .push(format!("{}: {}", build.path.display(), e));
            }
        }
    }

    Ok(result)
}
