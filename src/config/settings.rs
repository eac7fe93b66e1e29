//! Typed settings deserialized from the merged configuration

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::effective::ConfigError;
use crate::index::RetentionPolicy;
use crate::timeout::TimeoutConfig;

/// Fully resolved repository settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Repository directory root
    pub repo_dir: PathBuf,

    /// Public base URL of the repository (ends in `/repo` by convention)
    pub repo_url: String,

    /// Display name
    pub repo_name: String,

    /// Display description
    pub repo_description: String,

    /// Keystore passphrase supplied by configuration
    #[serde(default)]
    pub keystore_pass: Option<String>,

    /// Key passphrase supplied by configuration
    #[serde(default)]
    pub key_pass: Option<String>,

    pub identity: IdentitySettings,

    pub builder: BuilderSettings,

    pub timeouts: TimeoutConfig,

    pub publish: PublishSettings,

    pub retention: RetentionPolicy,

    pub serve: ServeSettings,

    /// Explicit mirrors
    #[serde(default)]
    pub mirrors: Vec<MirrorSettings>,

    /// Object-store bucket shorthand (from `REPO_BUCKET`)
    #[serde(default)]
    pub bucket: Option<BucketSettings>,
}

/// Signing identity generation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentitySettings {
    pub key_alias: String,
    pub dname: String,
    pub validity_days: u32,
    pub key_size: u32,
    /// keytool executable
    pub keytool: String,
}

/// Index builder invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderSettings {
    /// Executable (default: "fdroid")
    pub command: String,
    /// Arguments (default: ["update", "--create-metadata"])
    pub args: Vec<String>,
    /// Signed index the builder must produce, relative to the build workspace
    pub signed_index: String,
}

/// Publish behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishSettings {
    /// Wholesale retries per mirror after the first attempt
    pub retries: u32,
    /// Pause before each retry
    #[serde(default)]
    pub retry_delay_ms: u64,
}

/// HTTP serving surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServeSettings {
    pub bind: String,
}

/// Object-store provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreProvider {
    /// Google Cloud Storage via `gsutil`
    Gcs,
    /// Amazon S3 via `aws s3`
    S3,
}

/// Mirror target kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MirrorTarget {
    /// A directory served over HTTP; relative paths resolve against `repo_dir`
    Local { path: PathBuf },
    /// A bucket in an object store
    ObjectStore {
        provider: StoreProvider,
        bucket: String,
        #[serde(default = "default_prefix")]
        prefix: String,
    },
}

fn default_prefix() -> String {
    "repo".to_string()
}

/// One configured mirror
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorSettings {
    pub name: String,

    #[serde(flatten)]
    pub target: MirrorTarget,

    /// Extra exclude globs on top of the defaults
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Bucket shorthand
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketSettings {
    pub name: String,
    pub provider: StoreProvider,
}

impl Settings {
    /// Validate values that serde cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timeouts
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        if !(self.repo_url.starts_with("http://") || self.repo_url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "repo_url must be an http(s) URL, got {}",
                self.repo_url
            )));
        }

        if self.retention.keep_builds == 0 {
            return Err(ConfigError::ValidationError(
                "retention.keep_builds must be at least 1".to_string(),
            ));
        }

        if self.publish.retries > 10 {
            return Err(ConfigError::ValidationError(
                "publish.retries must be in [0, 10]".to_string(),
            ));
        }

        if self.identity.key_alias.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "identity.key_alias must not be empty".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for mirror in self.all_mirrors() {
            if mirror.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "mirror name must not be empty".to_string(),
                ));
            }
            if !names.insert(mirror.name.clone()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate mirror name: {}",
                    mirror.name
                )));
            }
        }

        Ok(())
    }

    /// Explicit mirrors plus the bucket shorthand, if any
    pub fn all_mirrors(&self) -> Vec<MirrorSettings> {
        let mut mirrors = self.mirrors.clone();
        if let Some(bucket) = &self.bucket {
            mirrors.push(MirrorSettings {
                name: "bucket".to_string(),
                target: MirrorTarget::ObjectStore {
                    provider: bucket.provider,
                    bucket: bucket.name.clone(),
                    prefix: default_prefix(),
                },
                exclude: Vec::new(),
            });
        }
        mirrors
    }

    /// Static root served over HTTP: the first local mirror, else `<repo_dir>/www`
    pub fn serve_root(&self) -> PathBuf {
        self.all_mirrors()
            .into_iter()
            .find_map(|mirror| match mirror.target {
                MirrorTarget::Local { path } => Some(self.resolve(&path)),
                MirrorTarget::ObjectStore { .. } => None,
            })
            .unwrap_or_else(|| self.repo_dir.join("www"))
    }

    /// Resolve a possibly relative path against the repository root
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.repo_dir.join(path)
        }
    }
}
