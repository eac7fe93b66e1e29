//! Metadata Store (`metadata/<package>.yml`, `metadata/<package>/`)

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::StoreError;

const RECORD_EXTENSION: &str = "yml";

/// Per-package descriptive records consumed by the index builder
#[derive(Debug, Clone)]
pub struct MetadataStore {
    dir: PathBuf,
}

impl MetadataStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, package_id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", package_id, RECORD_EXTENSION))
    }

    /// Screenshots, icons and localized text for a package
    pub fn assets_dir(&self, package_id: &str) -> PathBuf {
        self.dir.join(package_id)
    }

    pub fn has_record(&self, package_id: &str) -> bool {
        self.record_path(package_id).is_file()
    }

    /// Package ids that have a record, sorted
    pub fn records(&self) -> Result<Vec<String>, StoreError> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for dirent in read_dir {
            let path = dirent?.path();
            let is_record = path.extension().map(|e| e == RECORD_EXTENSION).unwrap_or(false);
            if is_record && path.is_file() {
                if let Some(stem) = path.file_stem() {
                    ids.push(stem.to_string_lossy().into_owned());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Remove the record and asset directory; returns what existed
    pub fn remove(&self, package_id: &str) -> Result<Vec<PathBuf>, StoreError> {
        let mut removed = Vec::new();

        let record = self.record_path(package_id);
        match fs::remove_file(&record) {
            Ok(()) => removed.push(record),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let assets = self.assets_dir(package_id);
        match fs::remove_dir_all(&assets) {
            Ok(()) => removed.push(assets),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(removed)
    }

    /// Copy records from `generated` that the store lacks.
    ///
    /// The index builder writes default records for packages without one;
    /// adopting them keeps later builds stable. Existing records win.
    pub fn adopt_missing(&self, generated: &Path) -> Result<Vec<String>, StoreError> {
        let generated_store = MetadataStore::new(generated);
        let mut adopted = Vec::new();

        for package_id in generated_store.records()? {
            if self.has_record(&package_id) {
                continue;
            }
            fs::create_dir_all(&self.dir)?;
            let dest = self.record_path(&package_id);
            let partial = dest.with_extension("yml.partial");
            fs::copy(generated_store.record_path(&package_id), &partial)?;
            fs::rename(&partial, &dest)?;
            debug!(package = %package_id, "adopted generated metadata record");
            adopted.push(package_id);
        }

        Ok(adopted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_records_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::new(dir.path());
        fs::write(store.record_path("org.b"), "").unwrap();
        fs::write(store.record_path("org.a"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        fs::create_dir_all(store.assets_dir("org.a")).unwrap();

        assert_eq!(store.records().unwrap(), vec!["org.a", "org.b"]);
    }

    #[test]
    fn test_remove_absent_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::new(dir.path().join("metadata"));
        assert!(store.remove("org.none").unwrap().is_empty());
    }

    #[test]
    fn test_adopt_missing_keeps_existing() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::new(dir.path().join("metadata"));
        let generated = dir.path().join("build/metadata");
        fs::create_dir_all(&generated).unwrap();
        fs::create_dir_all(store.dir()).unwrap();

        fs::write(store.record_path("org.a"), "Name: curated\n").unwrap();
        fs::write(generated.join("org.a.yml"), "Name: default\n").unwrap();
        fs::write(generated.join("org.b.yml"), "Name: default\n").unwrap();

        let adopted = store.adopt_missing(&generated).unwrap();
        assert_eq!(adopted, vec!["org.b"]);
        assert_eq!(
            fs::read_to_string(store.record_path("org.a")).unwrap(),
            "Name: curated\n"
        );
        assert!(store.has_record("org.b"));
    }
}
