//! Mock mirror: an in-memory bucket

use std::collections::BTreeMap;
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use repo_tree::{SyncPlan, TreeEntry, TreeManifest};

use super::{FailureConfig, FailureInjector, MockOperation};
use crate::mirror::{Mirror, MirrorSyncError, SyncReport, SyncRequest};

#[derive(Debug, Default)]
struct MockMirrorState {
    reachable: bool,
    /// path -> sha256
    objects: BTreeMap<String, String>,
    landing: Option<Vec<u8>>,
    last_build: Option<String>,
    sync_count: u32,
}

/// In-memory mirror; clones share state
#[derive(Debug, Clone)]
pub struct MockMirror {
    name: String,
    state: Arc<Mutex<MockMirrorState>>,
    failures: Arc<Mutex<FailureInjector>>,
}

impl MockMirror {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MockMirrorState {
                reachable: true,
                ..MockMirrorState::default()
            })),
            failures: Arc::new(Mutex::new(FailureInjector::new())),
        }
    }

    /// Every sync fails as unreachable until `set_reachable(true)`
    pub fn unreachable(self) -> Self {
        self.set_reachable(false);
        self
    }

    /// Fail the next `count` syncs, then succeed
    pub fn fail_times(self, count: u32) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            failures.inject(
                MockOperation::Sync,
                FailureConfig::error("injected sync failure").with_fail_count(count),
            );
        }
        self
    }

    pub fn set_reachable(&self, reachable: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.reachable = reachable;
        }
    }

    pub fn sync_count(&self) -> u32 {
        self.state.lock().map(|s| s.sync_count).unwrap_or(0)
    }

    /// Object paths currently held, sorted
    pub fn paths(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.state
            .lock()
            .map(|s| s.objects.contains_key(path))
            .unwrap_or(false)
    }

    pub fn landing(&self) -> Option<Vec<u8>> {
        self.state.lock().ok().and_then(|s| s.landing.clone())
    }

    pub fn last_build(&self) -> Option<String> {
        self.state.lock().ok().and_then(|s| s.last_build.clone())
    }

    fn manifest(objects: &BTreeMap<String, String>) -> TreeManifest {
        let entries = objects
            .iter()
            .map(|(path, sha256)| TreeEntry {
                path: path.clone(),
                size: 0,
                sha256: sha256.clone(),
            })
            .collect();
        TreeManifest::from_entries(entries).unwrap_or_else(|_| TreeManifest::empty())
    }
}

impl Mirror for MockMirror {
    fn name(&self) -> &str {
        &self.name
    }

    fn sync(&self, request: &SyncRequest<'_>) -> Result<SyncReport, MirrorSyncError> {
        let start = Instant::now();

        let injected = match self.failures.lock() {
            Ok(mut failures) => failures.check(MockOperation::Sync).1,
            Err(_) => None,
        };

        let mut state = self
            .state
            .lock()
            .map_err(|_| MirrorSyncError::Unreachable("mock state poisoned".to_string()))?;
        state.sync_count += 1;

        if !state.reachable {
            return Err(MirrorSyncError::Unreachable(format!(
                "mock mirror {} unreachable",
                self.name
            )));
        }
        if let Some(message) = injected {
            return Err(MirrorSyncError::Command(message));
        }

        let source = TreeManifest::scan(request.tree).map_err(|e| MirrorSyncError::Tree(e.to_string()))?;
        let mut sized_target = Self::manifest(&state.objects);
        // Sizes are not tracked remotely; compare by digest only
        for entry in &mut sized_target.entries {
            if let Some(src) = source.get(&entry.path) {
                entry.size = src.size;
            }
        }
        let plan = SyncPlan::between(&source, &sized_target);

        state.objects = source
            .entries
            .iter()
            .map(|e| (e.path.clone(), e.sha256.clone()))
            .collect();
        state.landing = fs::read(request.landing_page).ok();
        state.last_build = Some(request.build_id.to_string());

        Ok(SyncReport {
            files: source.len(),
            bytes: source.total_bytes(),
            uploaded: Some(plan.upload.len()),
            deleted: Some(plan.delete.len()),
            unchanged: Some(plan.unchanged),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn sync(mirror: &MockMirror, tree: &Path) -> Result<SyncReport, MirrorSyncError> {
        mirror.sync(&SyncRequest {
            build_id: "01A",
            tree,
            landing_page: &tree.join("missing.html"),
            timeout: Duration::from_secs(1),
            log_dir: None,
        })
    }

    #[test]
    fn test_reconciles_like_a_bucket() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.apk"), "a").unwrap();
        fs::write(dir.path().join("b.apk"), "b").unwrap();
        let mirror = MockMirror::new("bucket");

        let report = sync(&mirror, dir.path()).unwrap();
        assert_eq!(report.uploaded, Some(2));

        fs::remove_file(dir.path().join("a.apk")).unwrap();
        let report = sync(&mirror, dir.path()).unwrap();
        assert_eq!(report.deleted, Some(1));
        assert_eq!(report.unchanged, Some(1));
        assert_eq!(mirror.paths(), vec!["b.apk"]);
    }

    #[test]
    fn test_unreachable_until_restored() {
        let dir = TempDir::new().unwrap();
        let mirror = MockMirror::new("bucket").unreachable();

        assert!(matches!(
            sync(&mirror, dir.path()),
            Err(MirrorSyncError::Unreachable(_))
        ));
        mirror.set_reachable(true);
        assert!(sync(&mirror, dir.path()).is_ok());
        assert_eq!(mirror.sync_count(), 2);
    }
}
