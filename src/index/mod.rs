//! Repository index records
//!
//! Each successful build leaves `builds/<id>/index.json` describing the signed
//! index it produced. `current.json` names the build that is authoritative.
//! The pointer is only ever replaced by write-then-rename, so readers see
//! either the previous index or the new one, never a mix.

mod retention;

pub use retention::{prune_builds, BuildGcResult, RetentionPolicy};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::layout::RepoLayout;

/// Record file inside each committed build
pub const INDEX_RECORD_FILE: &str = "index.json";

pub const INDEX_SCHEMA_VERSION: u32 = 1;
pub const INDEX_SCHEMA_ID: &str = "fdroid-repo/repository_index@1";

pub const POINTER_SCHEMA_VERSION: u32 = 1;
pub const POINTER_SCHEMA_ID: &str = "fdroid-repo/current@1";

/// Errors reading or committing index records
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("unexpected schema_id {actual} (expected {expected})")]
    Schema { expected: String, actual: String },

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// One signed index produced by a successful build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryIndex {
    pub schema_version: u32,

    pub schema_id: String,

    pub build_id: String,

    /// Monotonic index version, one more than the index it replaced
    pub version: u64,

    /// Signed index, relative to the build directory
    pub signed_payload: String,

    pub built_at: DateTime<Utc>,

    pub artifact_count: usize,

    /// Digest of artifacts, metadata, builder config and fingerprint
    pub inputs_sha256: String,

    /// Fingerprint (hex) of the certificate that signed this index
    pub fingerprint: String,
}

impl RepositoryIndex {
    pub fn new(
        build_id: String,
        version: u64,
        signed_payload: String,
        artifact_count: usize,
        inputs_sha256: String,
        fingerprint: String,
    ) -> Self {
        Self {
            schema_version: INDEX_SCHEMA_VERSION,
            schema_id: INDEX_SCHEMA_ID.to_string(),
            build_id,
            version,
            signed_payload,
            built_at: Utc::now(),
            artifact_count,
            inputs_sha256,
            fingerprint,
        }
    }

    /// Absolute path of the signed payload for this record
    pub fn signed_payload_path(&self, layout: &RepoLayout) -> PathBuf {
        layout.build_dir(&self.build_id).join(&self.signed_payload)
    }

    /// Published tree of this build (`builds/<id>/repo`)
    pub fn repo_tree(&self, layout: &RepoLayout) -> PathBuf {
        layout.build_dir(&self.build_id).join("repo")
    }

    pub fn write_to_build_dir(&self, build_dir: &Path) -> Result<(), IndexError> {
        write_json_atomic(&build_dir.join(INDEX_RECORD_FILE), self)
    }

    pub fn from_build_dir(build_dir: &Path) -> Result<Self, IndexError> {
        let json = fs::read_to_string(build_dir.join(INDEX_RECORD_FILE))?;
        let record: Self = serde_json::from_str(&json)?;
        check_schema(INDEX_SCHEMA_ID, &record.schema_id)?;
        Ok(record)
    }
}

/// Pointer to the authoritative build (current.json)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentPointer {
    pub schema_version: u32,
    pub schema_id: String,
    pub build_id: String,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl CurrentPointer {
    pub fn for_index(index: &RepositoryIndex) -> Self {
        Self {
            schema_version: POINTER_SCHEMA_VERSION,
            schema_id: POINTER_SCHEMA_ID.to_string(),
            build_id: index.build_id.clone(),
            version: index.version,
            updated_at: Utc::now(),
        }
    }
}

/// Load the authoritative index, if one has been committed
pub fn load_current(layout: &RepoLayout) -> Result<Option<RepositoryIndex>, IndexError> {
    let json = match fs::read_to_string(layout.current_pointer()) {
        Ok(json) => json,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let pointer: CurrentPointer = serde_json::from_str(&json)?;
    check_schema(POINTER_SCHEMA_ID, &pointer.schema_id)?;

    RepositoryIndex::from_build_dir(&layout.build_dir(&pointer.build_id)).map(Some)
}

/// Make `index` authoritative: record first, then swap the pointer
pub fn commit(layout: &RepoLayout, index: &RepositoryIndex) -> Result<(), IndexError> {
    index.write_to_build_dir(&layout.build_dir(&index.build_id))?;
    write_json_atomic(&layout.current_pointer(), &CurrentPointer::for_index(index))
}

fn check_schema(expected: &str, actual: &str) -> Result<(), IndexError> {
    if expected == actual {
        Ok(())
    } else {
        Err(IndexError::Schema {
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), IndexError> {
    let json = serde_json::to_string_pretty(value)?;
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, json)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}
