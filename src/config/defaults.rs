//! Built-in defaults (layer 1) and the environment layer (layer 3)

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// File name of the repository config file inside the repository root
pub const CONFIG_FILE_NAME: &str = "fdroid-repo.toml";

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Repository directory root (default: "./fdroid")
    pub repo_dir: String,

    /// Public base URL of the repository (default: "http://localhost:8080/repo")
    pub repo_url: String,

    /// Display name
    pub repo_name: String,

    /// Display description
    pub repo_description: String,

    /// Keystore alias of the signing key (default: "repokey")
    pub key_alias: String,

    /// Distinguished name of the self-signed certificate
    pub key_dname: String,

    /// Certificate validity (default: 10000 days)
    pub key_validity_days: u32,

    /// RSA key size (default: 4096)
    pub key_size: u32,

    /// Index builder executable (default: "fdroid")
    pub builder_command: String,

    /// Index build timeout (default: 1800 = 30 minutes)
    pub build_seconds: u64,

    /// Mirror sync timeout (default: 900 = 15 minutes)
    pub mirror_seconds: u64,

    /// Key generation timeout (default: 120)
    pub keygen_seconds: u64,

    /// Wholesale retries per mirror (default: 1)
    pub publish_retries: u32,

    /// Builds kept on disk (default: 3)
    pub keep_builds: usize,

    /// HTTP bind address (default: "127.0.0.1:8080")
    pub serve_bind: String,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            repo_dir: "./fdroid".to_string(),
            repo_url: "http://localhost:8080/repo".to_string(),
            repo_name: "F-Droid Repository".to_string(),
            repo_description: "Self-hosted F-Droid repository".to_string(),
            key_alias: "repokey".to_string(),
            key_dname: "CN=fdroid-repo, OU=F-Droid".to_string(),
            key_validity_days: 10000,
            key_size: 4096,
            builder_command: "fdroid".to_string(),
            build_seconds: 1800,
            mirror_seconds: 900,
            keygen_seconds: 120,
            publish_retries: 1,
            keep_builds: 3,
            serve_bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> Value {
        json!({
            "repo_dir": self.repo_dir,
            "repo_url": self.repo_url,
            "repo_name": self.repo_name,
            "repo_description": self.repo_description,
            "identity": {
                "key_alias": self.key_alias,
                "dname": self.key_dname,
                "validity_days": self.key_validity_days,
                "key_size": self.key_size,
                "keytool": "keytool"
            },
            "builder": {
                "command": self.builder_command,
                "args": ["update", "--create-metadata"],
                "signed_index": "repo/index-v1.jar"
            },
            "timeouts": {
                "build_seconds": self.build_seconds,
                "mirror_seconds": self.mirror_seconds,
                "keygen_seconds": self.keygen_seconds
            },
            "publish": {
                "retries": self.publish_retries,
                "retry_delay_ms": 2000
            },
            "retention": {
                "keep_builds": self.keep_builds,
                "keep_failed_builds": false
            },
            "serve": {
                "bind": self.serve_bind
            },
            "mirrors": [
                {"name": "http", "kind": "local", "path": "www"}
            ]
        })
    }
}

/// Build the environment layer from a variable lookup.
///
/// Returns `None` when no recognized variable is set. Taking the lookup as a
/// closure keeps tests independent of the process environment.
pub fn env_layer<F>(lookup: F) -> Option<Value>
where
    F: Fn(&str) -> Option<String>,
{
    let mut map = Map::new();

    let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

    for (var, key) in [
        ("REPO_DIR", "repo_dir"),
        ("REPO_URL", "repo_url"),
        ("REPO_NAME", "repo_name"),
        ("KEYSTORE_PASS", "keystore_pass"),
        ("KEY_PASS", "key_pass"),
    ] {
        if let Some(value) = get(var) {
            map.insert(key.to_string(), Value::String(value));
        }
    }

    if let Some(bucket) = get("REPO_BUCKET") {
        let provider = get("REPO_BUCKET_PROVIDER").unwrap_or_else(|| "gcs".to_string());
        map.insert(
            "bucket".to_string(),
            json!({"name": bucket, "provider": provider}),
        );
    }

    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map))
    }
}
