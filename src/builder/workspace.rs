//! Build workspaces and input digests

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use repo_tree::{materialize, ExcludeRules, TreeManifest};
use tracing::debug;

use super::IndexBuildError;
use crate::identity::Fingerprint;
use crate::layout::{write_if_changed, RepoLayout};

/// Digests of everything that determines an index build
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildInputs {
    pub artifacts_sha256: String,
    pub artifact_files: usize,
    pub metadata_sha256: String,
    pub config_sha256: String,
    pub fingerprint: String,
}

impl BuildInputs {
    /// Scan the stores and combine them with the rendered builder config
    pub fn collect(
        layout: &RepoLayout,
        config_yml: &str,
        fingerprint: &Fingerprint,
    ) -> Result<Self, IndexBuildError> {
        let rules = exclude_rules()?;
        let artifacts = scan(&layout.artifacts_dir(), &rules)?;
        let metadata = scan(&layout.metadata_dir(), &rules)?;

        Ok(Self {
            artifacts_sha256: artifacts.root_sha256,
            artifact_files: artifacts.entries.len(),
            metadata_sha256: metadata.root_sha256,
            config_sha256: hex::encode(Sha256::digest(config_yml.as_bytes())),
            fingerprint: fingerprint.to_hex(),
        })
    }

    /// Re-scan the Metadata Store after generated records were adopted
    pub fn refresh_metadata(&mut self, layout: &RepoLayout) -> Result<(), IndexBuildError> {
        let rules = exclude_rules()?;
        self.metadata_sha256 = scan(&layout.metadata_dir(), &rules)?.root_sha256;
        Ok(())
    }

    /// Combined digest recorded in the index
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (label, value) in [
            ("artifacts", &self.artifacts_sha256),
            ("metadata", &self.metadata_sha256),
            ("config", &self.config_sha256),
            ("fingerprint", &self.fingerprint),
        ] {
            hasher.update(label.as_bytes());
            hasher.update(b":");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}

/// One isolated build directory (`builds/<id>`)
#[derive(Debug, Clone)]
pub struct BuildWorkspace {
    pub build_id: String,
    pub dir: PathBuf,
}

impl BuildWorkspace {
    /// Create `builds/<id>` with `repo/`, `metadata/` and `config.yml`
    pub fn prepare(
        layout: &RepoLayout,
        build_id: &str,
        config_yml: &str,
    ) -> Result<Self, IndexBuildError> {
        let dir = layout.build_dir(build_id);
        fs::create_dir_all(layout.builds_dir())?;
        fs::create_dir(&dir).map_err(|e| {
            IndexBuildError::Workspace(format!("cannot create {}: {}", dir.display(), e))
        })?;

        let workspace = Self {
            build_id: build_id.to_string(),
            dir,
        };

        let rules = exclude_rules()?;
        for (source, dest) in [
            (layout.artifacts_dir(), workspace.repo_dir()),
            (layout.metadata_dir(), workspace.metadata_dir()),
        ] {
            let manifest = scan(&source, &rules)?;
            let stats = materialize(&source, &manifest, &dest)
                .map_err(|e| IndexBuildError::Workspace(e.to_string()))?;
            debug!(
                build_id = %build_id,
                dest = %dest.display(),
                linked = stats.linked,
                copied = stats.copied,
                "staged build input"
            );
        }

        write_if_changed(&workspace.config_path(), config_yml.as_bytes(), true)?;
        Ok(workspace)
    }

    pub fn repo_dir(&self) -> PathBuf {
        self.dir.join("repo")
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.dir.join("metadata")
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join("config.yml")
    }

}

fn exclude_rules() -> Result<ExcludeRules, IndexBuildError> {
    ExcludeRules::new().map_err(|e| IndexBuildError::Workspace(e.to_string()))
}

fn scan(root: &Path, rules: &ExcludeRules) -> Result<TreeManifest, IndexBuildError> {
    TreeManifest::scan_with(root, rules).map_err(|e| IndexBuildError::Workspace(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seed(layout: &RepoLayout) {
        fs::create_dir_all(layout.artifacts_dir()).unwrap();
        fs::create_dir_all(layout.metadata_dir()).unwrap();
        fs::write(layout.artifacts_dir().join("org.a_1.apk"), "apk").unwrap();
        fs::write(layout.artifacts_dir().join(".org.b_1.apk.partial"), "half").unwrap();
        fs::write(layout.metadata_dir().join("org.a.yml"), "Name: A\n").unwrap();
    }

    #[test]
    fn test_prepare_stages_inputs() {
        let dir = TempDir::new().unwrap();
        let layout = RepoLayout::new(dir.path());
        seed(&layout);

        let ws = BuildWorkspace::prepare(&layout, "01A", "repo_name: 'x'\n").unwrap();
        assert!(ws.repo_dir().join("org.a_1.apk").is_file());
        assert!(!ws.repo_dir().join(".org.b_1.apk.partial").exists());
        assert!(ws.metadata_dir().join("org.a.yml").is_file());
        assert_eq!(fs::read_to_string(ws.config_path()).unwrap(), "repo_name: 'x'\n");

        // Same id twice is refused
        assert!(matches!(
            BuildWorkspace::prepare(&layout, "01A", ""),
            Err(IndexBuildError::Workspace(_))
        ));

    }

    #[test]
    fn test_prepare_empty_stores() {
        let dir = TempDir::new().unwrap();
        let layout = RepoLayout::new(dir.path());

        let ws = BuildWorkspace::prepare(&layout, "01A", "").unwrap();
        assert!(ws.repo_dir().is_dir());
        assert_eq!(fs::read_dir(ws.repo_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_inputs_digest_tracks_changes() {
        let dir = TempDir::new().unwrap();
        let layout = RepoLayout::new(dir.path());
        seed(&layout);
        let fp = Fingerprint::of_der(b"cert");

        let first = BuildInputs::collect(&layout, "cfg", &fp).unwrap();
        let again = BuildInputs::collect(&layout, "cfg", &fp).unwrap();
        assert_eq!(first.digest(), again.digest());
        assert_eq!(first.artifact_files, 1);

        fs::write(layout.metadata_dir().join("org.a.yml"), "Name: B\n").unwrap();
        let changed = BuildInputs::collect(&layout, "cfg", &fp).unwrap();
        assert_ne!(first.digest(), changed.digest());

        let other_config = BuildInputs::collect(&layout, "cfg2", &fp).unwrap();
        assert_ne!(changed.digest(), other_config.digest());
    }
}
