//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use fdroid_repo::mirror::{self, Mirror};
use fdroid_repo::mock::{MockIndexBuilder, MockKeyGenerator};
use fdroid_repo::{EffectiveConfig, Repository};
use serde_json::json;
use tempfile::TempDir;

/// A repository in a temp dir with the default local mirror at `<repo>/www`
pub struct Fixture {
    pub dir: TempDir,
    pub repo: Repository,
    pub keys: MockKeyGenerator,
    pub builder: MockIndexBuilder,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let repo = open_repo(dir.path());
        Self {
            dir,
            repo,
            keys: MockKeyGenerator::new(),
            builder: MockIndexBuilder::new(),
        }
    }

    /// Write an APK outside the repository and return its path
    pub fn apk(&self, name: &str, contents: &str) -> PathBuf {
        let incoming = self.dir.path().join("incoming");
        fs::create_dir_all(&incoming).unwrap();
        let path = incoming.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    /// Configured mirrors (the local HTTP root)
    pub fn configured_mirrors(&self) -> Vec<Box<dyn Mirror>> {
        mirror::from_settings(self.repo.settings()).unwrap()
    }

    pub fn www(&self) -> PathBuf {
        self.repo.settings().serve_root()
    }
}

pub fn open_repo(dir: &Path) -> Repository {
    let settings = EffectiveConfig::build(
        None,
        None,
        Some(json!({
            "repo_dir": dir.join("repo"),
            "repo_name": "Test Apps",
            "publish": {"retries": 1, "retry_delay_ms": 0},
        })),
    )
    .unwrap()
    .settings()
    .unwrap();
    Repository::open(settings).unwrap()
}
