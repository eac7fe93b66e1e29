//! Materializing a tree into a fresh directory
//!
//! Files are hard-linked when source and destination share a filesystem and
//! copied otherwise. The destination must not exist yet; callers build into a
//! staging directory and rename it into place.

use std::fs;
use std::io;
use std::path::Path;

use crate::manifest::{TreeError, TreeManifest};

/// Counters from a materialization
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterializeStats {
    /// Files hard-linked
    pub linked: usize,
    /// Files copied
    pub copied: usize,
    /// Bytes written by copies
    pub bytes_copied: u64,
}

/// Place every entry of `manifest` (read from `source_root`) under `dest_root`
pub fn materialize(
    source_root: &Path,
    manifest: &TreeManifest,
    dest_root: &Path,
) -> Result<MaterializeStats, TreeError> {
    if dest_root.exists() {
        return Err(TreeError::IoError(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("destination already exists: {}", dest_root.display()),
        )));
    }
    fs::create_dir_all(dest_root)?;

    let mut stats = MaterializeStats::default();

    for entry in &manifest.entries {
        let src = source_root.join(&entry.path);
        let dst = dest_root.join(&entry.path);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }

        match fs::hard_link(&src, &dst) {
            Ok(()) => stats.linked += 1,
            Err(_) => {
                stats.bytes_copied += fs::copy(&src, &dst)?;
                stats.copied += 1;
            }
        }
    }

    Ok(stats)
}
