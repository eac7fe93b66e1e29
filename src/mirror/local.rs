//! Local directory mirror (the HTTP server's static root)
//!
//! The new tree is materialized next to the live one and swapped in with two
//! renames, so the server never serves a half-copied tree.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use repo_tree::{materialize, ExcludeRules, SyncPlan, TreeManifest};
use tracing::{debug, info};

use super::{Mirror, MirrorSyncError, SyncReport, SyncRequest};
use crate::layout::write_if_changed;

const LIVE_DIR: &str = "repo";
const INCOMING_DIR: &str = "repo.incoming";
const RETIRED_DIR: &str = "repo.old";
const LANDING_FILE: &str = "index.html";

/// Mirror into `<root>/repo` and `<root>/index.html`
#[derive(Debug, Clone)]
pub struct LocalDirMirror {
    name: String,
    root: PathBuf,
    rules: ExcludeRules,
}

impl LocalDirMirror {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>, rules: ExcludeRules) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            rules,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn live_dir(&self) -> PathBuf {
        self.root.join(LIVE_DIR)
    }

    fn scan(&self, root: &Path) -> Result<TreeManifest, MirrorSyncError> {
        TreeManifest::scan_with(root, &self.rules).map_err(|e| MirrorSyncError::Tree(e.to_string()))
    }

    /// Replace the live tree with `source`
    fn swap_in(&self, tree: &Path, source: &TreeManifest) -> Result<(), MirrorSyncError> {
        let live = self.root.join(LIVE_DIR);
        let incoming = self.root.join(INCOMING_DIR);
        let retired = self.root.join(RETIRED_DIR);

        remove_dir_if_present(&incoming)?;
        remove_dir_if_present(&retired)?;

        materialize(tree, source, &incoming).map_err(|e| MirrorSyncError::Tree(e.to_string()))?;

        if live.exists() {
            fs::rename(&live, &retired)?;
        }
        if let Err(e) = fs::rename(&incoming, &live) {
            // Put the previous tree back before reporting
            if retired.exists() {
                let _ = fs::rename(&retired, &live);
            }
            return Err(e.into());
        }
        remove_dir_if_present(&retired)?;
        Ok(())
    }
}

impl Mirror for LocalDirMirror {
    fn name(&self) -> &str {
        &self.name
    }

    fn sync(&self, request: &SyncRequest<'_>) -> Result<SyncReport, MirrorSyncError> {
        let start = Instant::now();
        fs::create_dir_all(&self.root).map_err(|e| {
            MirrorSyncError::Unreachable(format!("{}: {}", self.root.display(), e))
        })?;

        let source = self.scan(request.tree)?;
        let target = self.scan(&self.live_dir())?;
        let plan = SyncPlan::between(&source, &target);

        if plan.is_noop() && self.live_dir().is_dir() {
            debug!(mirror = %self.name, "tree already current");
        } else {
            self.swap_in(request.tree, &source)?;
        }

        let landing = fs::read(request.landing_page)?;
        write_if_changed(&self.root.join(LANDING_FILE), &landing, false)?;

        info!(
            mirror = %self.name,
            build_id = %request.build_id,
            plan = %plan.summary(),
            "local mirror synced"
        );

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

fn remove_dir_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn request<'a>(tree: &'a Path, landing: &'a Path) -> SyncRequest<'a> {
        SyncRequest {
            build_id: "01A",
            tree,
            landing_page: landing,
            timeout: Duration::from_secs(10),
            log_dir: None,
        }
    }

    fn fixture(dir: &Path, files: &[(&str, &str)]) -> PathBuf {
        let tree = dir.join("tree");
        let _ = fs::remove_dir_all(&tree);
        for (path, contents) in files {
            let path = tree.join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, contents).unwrap();
        }
        fs::create_dir_all(&tree).unwrap();
        tree
    }

    #[test]
    fn test_sync_then_prune() {
        let dir = TempDir::new().unwrap();
        let landing = dir.path().join("landing.html");
        fs::write(&landing, "<h1>repo</h1>").unwrap();
        let mirror = LocalDirMirror::new("http", dir.path().join("www"), ExcludeRules::new().unwrap());

        let tree = fixture(dir.path(), &[("a_1.apk", "a"), ("index-v1.jar", "signed")]);
        let report = mirror.sync(&request(&tree, &landing)).unwrap();
        assert_eq!(report.files, 2);
        assert_eq!(report.uploaded, Some(2));
        assert_eq!(
            fs::read_to_string(dir.path().join("www/index.html")).unwrap(),
            "<h1>repo</h1>"
        );

        let tree = fixture(dir.path(), &[("index-v1.jar", "signed2")]);
        let report = mirror.sync(&request(&tree, &landing)).unwrap();
        assert_eq!(report.deleted, Some(1));
        assert_eq!(report.uploaded, Some(1));
        assert!(!mirror.live_dir().join("a_1.apk").exists());
        assert_eq!(
            fs::read_to_string(mirror.live_dir().join("index-v1.jar")).unwrap(),
            "signed2"
        );
        assert!(!dir.path().join("www/repo.incoming").exists());
        assert!(!dir.path().join("www/repo.old").exists());
    }

    #[test]
    fn test_resync_is_noop() {
        let dir = TempDir::new().unwrap();
        let landing = dir.path().join("landing.html");
        fs::write(&landing, "x").unwrap();
        let mirror = LocalDirMirror::new("http", dir.path().join("www"), ExcludeRules::new().unwrap());
        let tree = fixture(dir.path(), &[("a_1.apk", "a")]);

        mirror.sync(&request(&tree, &landing)).unwrap();
        let report = mirror.sync(&request(&tree, &landing)).unwrap();
        assert_eq!(report.uploaded, Some(0));
        assert_eq!(report.unchanged, Some(1));
    }

    #[test]
    fn test_empty_tree_still_creates_live_dir() {
        let dir = TempDir::new().unwrap();
        let landing = dir.path().join("landing.html");
        fs::write(&landing, "x").unwrap();
        let mirror = LocalDirMirror::new("http", dir.path().join("www"), ExcludeRules::new().unwrap());
        let tree = fixture(dir.path(), &[]);

        mirror.sync(&request(&tree, &landing)).unwrap();
        assert!(mirror.live_dir().is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_unwritable_root_is_unreachable() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "not a dir").unwrap();
        let landing = dir.path().join("landing.html");
        fs::write(&landing, "x").unwrap();
        let mirror = LocalDirMirror::new("http", blocker.join("www"), ExcludeRules::new().unwrap());
        let tree = fixture(dir.path(), &[("a_1.apk", "a")]);

        assert!(matches!(
            mirror.sync(&request(&tree, &landing)),
            Err(MirrorSyncError::Unreachable(_))
        ));
    }
}
