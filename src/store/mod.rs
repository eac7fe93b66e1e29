//! Artifact and metadata stores
//!
//! Both stores are plain directories under the repository root. The
//! orchestrator only places, lists and removes files here; parsing APKs and
//! metadata records is the index builder's job.

mod artifacts;
mod metadata;

pub use artifacts::{parse_package_file, ArtifactEntry, ArtifactStore, PackageFile};
pub use metadata::MetadataStore;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Artifact file extension accepted by the store
pub const APK_EXTENSION: &str = "apk";

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("source not found: {0}")]
    SourceMissing(PathBuf),

    #[error("not an APK file: {0}")]
    NotAnArtifact(PathBuf),

    #[error("invalid package identifier: {0:?}")]
    InvalidPackage(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
