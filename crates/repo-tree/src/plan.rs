//! Full reconciliation plans
//!
//! A plan brings a target tree to exactly the content of a source tree:
//! changed or missing files are pushed, files absent from the source are
//! pruned. Mirrors are never append-only.

use serde::{Deserialize, Serialize};

use crate::manifest::TreeManifest;

/// Reconciliation plan between a source and a target tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPlan {
    /// Paths to copy from source to target (new or changed)
    pub upload: Vec<String>,

    /// Paths to remove from target
    pub delete: Vec<String>,

    /// Number of paths already identical
    pub unchanged: usize,
}

impl SyncPlan {
    /// Compute the plan that makes `target` equal to `source`
    pub fn between(source: &TreeManifest, target: &TreeManifest) -> Self {
        let mut plan = SyncPlan::default();

        for entry in &source.entries {
            match target.get(&entry.path) {
                Some(existing) if existing.sha256 == entry.sha256 && existing.size == entry.size => {
                    plan.unchanged += 1;
                }
                _ => plan.upload.push(entry.path.clone()),
            }
        }

        for entry in &target.entries {
            if source.get(&entry.path).is_none() {
                plan.delete.push(entry.path.clone());
            }
        }

        plan
    }

    /// True when the target already matches the source
    pub fn is_noop(&self) -> bool {
        self.upload.is_empty() && self.delete.is_empty()
    }

    /// Human-readable one-line summary
    pub fn summary(&self) -> String {
        format!(
            "{} to upload, {} to delete, {} unchanged",
            self.upload.len(),
            self.delete.len(),
            self.unchanged
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::TreeEntry;

    fn entry(path: &str, sha: &str) -> TreeEntry {
        TreeEntry {
            path: path.to_string(),
            size: 1,
            sha256: sha.to_string(),
        }
    }

    #[test]
    fn test_plan_upload_delete_unchanged() {
        let source = TreeManifest::from_entries(vec![
            entry("index-v1.jar", "new"),
            entry("a_1.apk", "aaa"),
            entry("c_3.apk", "ccc"),
        ])
        .unwrap();
        let target = TreeManifest::from_entries(vec![
            entry("index-v1.jar", "old"),
            entry("a_1.apk", "aaa"),
            entry("b_2.apk", "bbb"),
        ])
        .unwrap();

        let plan = SyncPlan::between(&source, &target);

        assert_eq!(plan.upload, vec!["c_3.apk".to_string(), "index-v1.jar".to_string()]);
        assert_eq!(plan.delete, vec!["b_2.apk".to_string()]);
        assert_eq!(plan.unchanged, 1);
        assert!(!plan.is_noop());
    }

    #[test]
    fn test_plan_noop() {
        let tree = TreeManifest::from_entries(vec![entry("a", "1")]).unwrap();
        let plan = SyncPlan::between(&tree, &tree);
        assert!(plan.is_noop());
        assert_eq!(plan.unchanged, 1);
    }

    #[test]
    fn test_plan_empty_source_prunes_everything() {
        let target = TreeManifest::from_entries(vec![entry("a", "1"), entry("b", "2")]).unwrap();
        let plan = SyncPlan::between(&TreeManifest::empty(), &target);
        assert_eq!(plan.delete.len(), 2);
        assert!(plan.upload.is_empty());
        assert_eq!(plan.summary(), "0 to upload, 2 to delete, 0 unchanged");
    }
}
