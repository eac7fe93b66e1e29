//! Tree manifests
//!
//! A manifest lists every regular file below a root, sorted by relative path,
//! with its size and SHA-256. `root_sha256` binds the whole set: it is the
//! SHA-256 of the JCS encoding of the entries, so two trees with equal content
//! have equal roots regardless of timestamps or scan order.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::Path;
use walkdir::WalkDir;

use crate::exclude::{ExcludeError, ExcludeRules};

/// A single file in a tree
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TreeEntry {
    /// Relative path using `/` separators
    pub path: String,

    /// Size in bytes
    pub size: u64,

    /// SHA-256 of file contents (hex)
    pub sha256: String,
}

/// Content manifest of a directory tree
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TreeManifest {
    /// Entries sorted by path
    pub entries: Vec<TreeEntry>,

    /// SHA-256 of JCS(entries)
    pub root_sha256: String,
}

/// Errors for manifest operations
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Walk error: {0}")]
    WalkError(#[from] walkdir::Error),

    #[error("JCS canonicalization error: {0}")]
    JcsError(String),

    #[error("Path is not within tree root: {0}")]
    PathNotInRoot(String),

    #[error("Exclude rules error: {0}")]
    ExcludeError(#[from] ExcludeError),
}

/// Stream a file through SHA-256
pub fn sha256_file(path: &Path) -> io::Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let size = io::copy(&mut file, &mut hasher)?;
    Ok((hex::encode(hasher.finalize()), size))
}

impl TreeManifest {
    /// Manifest of an empty tree
    pub fn empty() -> Self {
        Self::from_entries(Vec::new()).unwrap_or(Self {
            entries: Vec::new(),
            root_sha256: String::new(),
        })
    }

    /// Build a manifest from entries, sorting them and computing the root
    pub fn from_entries(entries: Vec<TreeEntry>) -> Result<Self, TreeError> {
        let map: BTreeMap<String, TreeEntry> =
            entries.into_iter().map(|e| (e.path.clone(), e)).collect();
        let entries: Vec<TreeEntry> = map.into_values().collect();
        let root_sha256 = Self::compute_root(&entries)?;
        Ok(Self {
            entries,
            root_sha256,
        })
    }

    fn compute_root(entries: &[TreeEntry]) -> Result<String, TreeError> {
        let entries_vec: Vec<_> = entries.to_vec();
        let jcs_bytes = serde_json_canonicalizer::to_vec(&entries_vec)
            .map_err(|e| TreeError::JcsError(e.to_string()))?;

        let mut hasher = Sha256::new();
        hasher.update(&jcs_bytes);
        Ok(hex::encode(hasher.finalize()))
    }

    /// Scan a directory with the default exclusion rules
    ///
    /// A missing root scans as an empty tree.
    pub fn scan(root: &Path) -> Result<Self, TreeError> {
        let rules = ExcludeRules::new()?;
        Self::scan_with(root, &rules)
    }

    /// Scan a directory, skipping paths matched by `rules`
    pub fn scan_with(root: &Path, rules: &ExcludeRules) -> Result<Self, TreeError> {
        if !root.exists() {
            return Self::from_entries(Vec::new());
        }

        let mut entries = Vec::new();

        for entry in WalkDir::new(root)
            .follow_links(false)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        {
            let entry = entry?;
            if !entry.file_type().is_file() {
                // Directories are implied by their files; symlinks are never published
                continue;
            }

            let rel_path = entry
                .path()
                .strip_prefix(root)
                .map_err(|_| TreeError::PathNotInRoot(entry.path().display().to_string()))?;

            if rules.is_excluded(rel_path) {
                continue;
            }

            let rel = rel_path
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");

            let (sha256, size) = sha256_file(entry.path())?;
            entries.push(TreeEntry {
                path: rel,
                size,
                sha256,
            });
        }

        Self::from_entries(entries)
    }

    /// Look up an entry by relative path
    pub fn get(&self, path: &str) -> Option<&TreeEntry> {
        self.entries
            .binary_search_by(|e| e.path.as_str().cmp(path))
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Number of files
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the tree has no files
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total bytes across all files
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }
}
