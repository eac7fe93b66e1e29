//! Artifact Store (`artifacts/*.apk`)

use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use regex_lite::Regex;
use tracing::{debug, info, warn};

use super::{MetadataStore, StoreError, APK_EXTENSION};

/// Package identifier and version parsed from an artifact file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFile {
    pub package_id: String,
    pub version_code: Option<u64>,
}

/// One artifact as listed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactEntry {
    pub file_name: String,
    pub package_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_code: Option<u64>,
    pub size: u64,
    pub sha256: String,
    pub has_metadata: bool,
}

/// True for a name that can stand for a package inside the stores:
/// non-empty, a single path component, not hidden.
pub fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(&['/', '\\', '\0'][..])
}

/// Parse `<applicationId>_<versionCode>.apk`; the whole stem is the
/// identifier when there is no numeric suffix. The extension is matched
/// case-insensitively.
///
/// The derived identifier is best effort. The index builder reads the real
/// applicationId from the APK itself.
pub fn parse_package_file(file_name: &str) -> Option<PackageFile> {
    if !is_plain_name(file_name) {
        return None;
    }
    let split = file_name.len().checked_sub(APK_EXTENSION.len() + 1)?;
    let (stem, extension) = (file_name.get(..split)?, file_name.get(split..)?);
    if !extension.eq_ignore_ascii_case(".apk") || stem.is_empty() {
        return None;
    }

    let (package_id, version_code) = match stem.rsplit_once('_') {
        Some((id, code))
            if !id.is_empty() && !code.is_empty() && code.bytes().all(|b| b.is_ascii_digit()) =>
        {
            (id, code.parse().ok())
        }
        _ => (stem, None),
    };

    Some(PackageFile {
        package_id: package_id.to_string(),
        version_code,
    })
}

/// Directory of APKs awaiting indexing
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy `source` into the store, keeping its file name
    pub fn add(&self, source: &Path, metadata: &MetadataStore) -> Result<ArtifactEntry, StoreError> {
        if !source.exists() {
            return Err(StoreError::SourceMissing(source.to_path_buf()));
        }
        let is_apk = source
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case(APK_EXTENSION))
            .unwrap_or(false);
        if !source.is_file() || !is_apk {
            return Err(StoreError::NotAnArtifact(source.to_path_buf()));
        }

        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| StoreError::NotAnArtifact(source.to_path_buf()))?;
        if parse_package_file(&file_name).is_none() {
            return Err(StoreError::NotAnArtifact(source.to_path_buf()));
        }

        fs::create_dir_all(&self.dir)?;
        let dest = self.dir.join(&file_name);
        let partial = self.dir.join(format!(".{}.partial", file_name));

        if let Err(e) = fs::copy(source, &partial).and_then(|_| fs::rename(&partial, &dest)) {
            let _ = fs::remove_file(&partial);
            return Err(e.into());
        }

        let entry = self.entry(&dest, &file_name, metadata)?;
        info!(
            file = %entry.file_name,
            package = %entry.package_id,
            sha256 = %entry.sha256,
            "added artifact"
        );
        Ok(entry)
    }

    /// Artifacts sorted by file name; a missing store is empty
    pub fn list(&self, metadata: &MetadataStore) -> Result<Vec<ArtifactEntry>, StoreError> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for dirent in read_dir {
            let dirent = dirent?;
            if !dirent.file_type()?.is_file() {
                continue;
            }
            let file_name = dirent.file_name().to_string_lossy().into_owned();
            if file_name.starts_with('.') {
                continue;
            }
            if parse_package_file(&file_name).is_none() {
                debug!(file = %file_name, "ignoring non-APK file in artifact store");
                continue;
            }
            entries.push(self.entry(&dirent.path(), &file_name, metadata)?);
        }

        entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(entries)
    }

    /// Delete every artifact of `package_id` along with its metadata.
    ///
    /// Idempotent: absent targets are not errors.
    pub fn remove(
        &self,
        package_id: &str,
        metadata: &MetadataStore,
    ) -> Result<Vec<PathBuf>, StoreError> {
        if !is_plain_name(package_id) {
            warn!(package = %package_id, "not a package identifier, nothing removed");
            return Ok(Vec::new());
        }

        let pattern = Regex::new(&format!(r"^{}(_\d+)?\.(?i:apk)$", regex_lite::escape(package_id)))
            .map_err(|_| StoreError::InvalidPackage(package_id.to_string()))?;

        let mut removed = Vec::new();
        match fs::read_dir(&self.dir) {
            Ok(read_dir) => {
                for dirent in read_dir {
                    let dirent = dirent?;
                    let name = dirent.file_name().to_string_lossy().into_owned();
                    if pattern.is_match(&name) {
                        remove_if_present(&dirent.path(), &mut removed)?;
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        removed.extend(metadata.remove(package_id)?);
        removed.sort();

        info!(package = %package_id, removed = removed.len(), "removed package");
        Ok(removed)
    }

    fn entry(
        &self,
        path: &Path,
        file_name: &str,
        metadata: &MetadataStore,
    ) -> Result<ArtifactEntry, StoreError> {
        let parsed = parse_package_file(file_name)
            .ok_or_else(|| StoreError::InvalidPackage(file_name.to_string()))?;
        let (sha256, size) = repo_tree::sha256_file(path)?;
        Ok(ArtifactEntry {
            file_name: file_name.to_string(),
            has_metadata: metadata.has_record(&parsed.package_id),
            package_id: parsed.package_id,
            version_code: parsed.version_code,
            size,
            sha256,
        })
    }
}

fn remove_if_present(path: &Path, removed: &mut Vec<PathBuf>) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            removed.push(path.to_path_buf());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
