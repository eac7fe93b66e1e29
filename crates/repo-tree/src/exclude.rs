//! Exclusion rules for tree scans
//!
//! Temporary and editor files never belong to a published tree.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;

/// Patterns excluded from every scan
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "**/*.tmp",
    "*.tmp",
    "**/*.partial",
    "*.partial",
    "**/.DS_Store",
    ".DS_Store",
    "**/*~",
];

/// Errors for exclusion rules
#[derive(Debug, thiserror::Error)]
pub enum ExcludeError {
    #[error("Glob pattern error: {0}")]
    GlobError(#[from] globset::Error),
}

/// Exclusion rules for filtering relative paths
#[derive(Debug, Clone)]
pub struct ExcludeRules {
    glob_set: GlobSet,
    patterns: Vec<String>,
}

impl ExcludeRules {
    /// Create exclusion rules with the defaults only
    pub fn new() -> Result<Self, ExcludeError> {
        Self::with_patterns::<&str>(&[])
    }

    /// Rules that exclude nothing
    pub fn none() -> Self {
        Self {
            glob_set: GlobSet::empty(),
            patterns: Vec::new(),
        }
    }

    /// Defaults plus additional patterns
    pub fn with_patterns<S: AsRef<str>>(extra: &[S]) -> Result<Self, ExcludeError> {
        let mut builder = GlobSetBuilder::new();
        let mut patterns = Vec::new();

        for pattern in DEFAULT_EXCLUDES.iter().copied().chain(extra.iter().map(|s| s.as_ref())) {
            if pattern.is_empty() {
                continue;
            }
            builder.add(Glob::new(pattern)?);
            patterns.push(pattern.to_string());
        }

        Ok(Self {
            glob_set: builder.build()?,
            patterns,
        })
    }

    /// Check if a relative path should be excluded
    pub fn is_excluded(&self, path: &Path) -> bool {
        let path_str = path.to_string_lossy();
        self.glob_set.is_match(path_str.as_ref())
    }

    /// Patterns in effect
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}
