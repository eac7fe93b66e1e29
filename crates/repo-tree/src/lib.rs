//! Repository tree manifests and reconciliation
//!
//! A published F-Droid repository is a plain directory tree. This crate
//! describes such a tree by content (sorted file entries plus a root digest)
//! and computes full reconciliation plans between two trees: files to push,
//! files to prune, files already in place.

mod exclude;
mod manifest;
mod materialize;
mod plan;

pub use exclude::{ExcludeError, ExcludeRules, DEFAULT_EXCLUDES};
pub use manifest::{sha256_file, TreeEntry, TreeError, TreeManifest};
pub use materialize::{materialize, MaterializeStats};
pub use plan::SyncPlan;
