//! Mock index builder
//!
//! Produces `repo/index-v1.json` (the unsigned payload), `repo/index-v1.jar`
//! (an envelope with the payload and an ed25519 signature), one detail page
//! per package and default metadata for packages without a record. APKs whose
//! content starts with `CORRUPT` are rejected as malformed.

use base64::Engine;
use ed25519_dalek::{Signature, Signer, Verifier};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use super::keygen::{certificate_public_key, open_keystore};
use super::{FailureConfig, FailureInjector, MockOperation};
use crate::builder::{BuildOutput, BuildRequest, IndexBuildError, IndexBuilder};
use crate::store::parse_package_file;

/// Signed index written by the mock, relative to the workspace
pub const MOCK_SIGNED_INDEX: &str = "repo/index-v1.jar";

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    payload: String,
    signature: String,
}

/// A verified signed index
#[derive(Debug, Clone)]
pub struct SignedIndex {
    pub payload: Value,
}

impl SignedIndex {
    /// Package ids listed in the index, in order
    pub fn package_ids(&self) -> Vec<String> {
        self.payload["packages"]
            .as_array()
            .map(|packages| {
                packages
                    .iter()
                    .filter_map(|p| p["package_id"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn artifact_count(&self) -> usize {
        self.payload["packages"].as_array().map(Vec::len).unwrap_or(0)
    }
}

/// Verify a mock signed index against a certificate
pub fn verify_signed_index(signed_index: &Path, certificate_pem: &str) -> Result<SignedIndex, String> {
    let json = fs::read_to_string(signed_index).map_err(|e| e.to_string())?;
    let envelope: Envelope = serde_json::from_str(&json).map_err(|e| e.to_string())?;

    let engine = base64::engine::general_purpose::STANDARD;
    let payload = engine.decode(&envelope.payload).map_err(|e| e.to_string())?;
    let signature = engine.decode(&envelope.signature).map_err(|e| e.to_string())?;
    let signature = Signature::from_slice(&signature).map_err(|e| e.to_string())?;

    certificate_public_key(certificate_pem)?
        .verify(&payload, &signature)
        .map_err(|e| format!("signature does not verify: {}", e))?;

    let payload = serde_json::from_slice(&payload).map_err(|e| e.to_string())?;
    Ok(SignedIndex { payload })
}

/// In-process index builder
#[derive(Debug, Clone, Default)]
pub struct MockIndexBuilder {
    failures: Arc<Mutex<FailureInjector>>,
    build_calls: Arc<AtomicU32>,
}

impl MockIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every build fails with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        let builder = Self::new();
        builder.inject(FailureConfig::error(message));
        builder
    }

    pub fn inject(&self, config: FailureConfig) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.inject(MockOperation::Build, config);
        }
    }

    /// Remove injected failures
    pub fn heal(&self) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.clear_op(MockOperation::Build);
        }
    }

    pub fn build_calls(&self) -> u32 {
        self.build_calls.load(Ordering::SeqCst)
    }
}

impl IndexBuilder for MockIndexBuilder {
    fn build(&self, request: &BuildRequest<'_>) -> Result<BuildOutput, IndexBuildError> {
        self.build_calls.fetch_add(1, Ordering::SeqCst);

        let (delay, error) = match self.failures.lock() {
            Ok(mut failures) => failures.check(MockOperation::Build),
            Err(_) => (None, None),
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if let Some(message) = error {
            return Err(IndexBuildError::Builder(message));
        }

        let signing_key = open_keystore(
            &request.identity.keystore_path,
            &request.identity.passphrases.keystore,
        )
        .map_err(IndexBuildError::Builder)?;

        let repo_dir = request.work_dir.join("repo");
        let metadata_dir = request.work_dir.join("metadata");

        let mut apks = Vec::new();
        for dirent in fs::read_dir(&repo_dir)? {
            let name = dirent?.file_name().to_string_lossy().into_owned();
            if let Some(parsed) = parse_package_file(&name) {
                apks.push((name, parsed));
            }
        }
        apks.sort_by(|a, b| a.0.cmp(&b.0));

        let mut packages = Vec::new();
        for (name, parsed) in &apks {
            let bytes = fs::read(repo_dir.join(name))?;
            if bytes.starts_with(b"CORRUPT") {
                return Err(IndexBuildError::Builder(format!(
                    "malformed artifact: {}",
                    name
                )));
            }
            let (sha256, size) = repo_tree::sha256_file(&repo_dir.join(name))?;
            packages.push(json!({
                "package_id": parsed.package_id,
                "version_code": parsed.version_code,
                "file": name,
                "sha256": sha256,
                "size": size,
            }));

            let detail_dir = repo_dir.join(&parsed.package_id);
            fs::create_dir_all(&detail_dir)?;
            fs::write(
                detail_dir.join("index.html"),
                format!("<h1>{}</h1>\n<p>{}</p>\n", parsed.package_id, name),
            )?;

            let record = metadata_dir.join(format!("{}.yml", parsed.package_id));
            if !record.exists() {
                fs::create_dir_all(&metadata_dir)?;
                fs::write(&record, "License: Unknown\nCategories:\n  - Other\n")?;
            }
        }

        let payload = serde_json::to_vec_pretty(&json!({
            "repo": {
                "build_id": request.build_id,
                "fingerprint": request.identity.fingerprint.to_hex(),
            },
            "packages": packages,
        }))
        .map_err(|e| IndexBuildError::Builder(e.to_string()))?;
        let signature = signing_key.sign(&payload);

        let engine = base64::engine::general_purpose::STANDARD;
        let envelope = Envelope {
            payload: engine.encode(&payload),
            signature: engine.encode(signature.to_bytes()),
        };
        fs::write(repo_dir.join("index-v1.json"), &payload)?;
        fs::write(
            request.work_dir.join(MOCK_SIGNED_INDEX),
            serde_json::to_vec(&envelope).map_err(|e| IndexBuildError::Builder(e.to_string()))?,
        )?;

        Ok(BuildOutput {
            signed_index: MOCK_SIGNED_INDEX.to_string(),
            artifact_count: packages.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{
        ensure_signing_identity, IdentityConfig, KeySpec, Passphrases, SigningIdentity,
    };
    use crate::mock::MockKeyGenerator;
    use std::time::Duration;
    use tempfile::TempDir;

    fn identity(dir: &Path) -> SigningIdentity {
        let config = IdentityConfig {
            dir: dir.join("identity"),
            lock_dir: dir.join(".locks"),
            lock_timeout: Duration::from_secs(5),
            spec: KeySpec {
                key_alias: "repokey".to_string(),
                dname: "CN=test".to_string(),
                validity_days: 1,
                key_size: 4096,
            },
            supplied: None,
        };
        ensure_signing_identity(&config, &MockKeyGenerator::new()).unwrap()
    }

    fn workspace(dir: &Path, apks: &[(&str, &str)]) -> std::path::PathBuf {
        let work = dir.join("work");
        fs::create_dir_all(work.join("repo")).unwrap();
        for (name, contents) in apks {
            fs::write(work.join("repo").join(name), contents).unwrap();
        }
        work
    }

    fn build(builder: &MockIndexBuilder, work: &Path, identity: &SigningIdentity) -> Result<BuildOutput, IndexBuildError> {
        builder.build(&BuildRequest {
            build_id: "01A",
            work_dir: work,
            identity,
            timeout: Duration::from_secs(5),
            log_path: None,
        })
    }

    #[test]
    fn test_signed_index_verifies() {
        let dir = TempDir::new().unwrap();
        let identity = identity(dir.path());
        let work = workspace(dir.path(), &[("org.a_1.apk", "a"), ("org.b_2.apk", "b")]);

        let output = build(&MockIndexBuilder::new(), &work, &identity).unwrap();
        assert_eq!(output.artifact_count, 2);

        let pem = fs::read_to_string(&identity.certificate_path).unwrap();
        let index = verify_signed_index(&work.join(&output.signed_index), &pem).unwrap();
        assert_eq!(index.package_ids(), vec!["org.a", "org.b"]);
        assert!(work.join("repo/org.a/index.html").is_file());
        assert!(work.join("metadata/org.b.yml").is_file());
    }

    #[test]
    fn test_empty_repo_still_signed() {
        let dir = TempDir::new().unwrap();
        let identity = identity(dir.path());
        let work = workspace(dir.path(), &[]);

        let output = build(&MockIndexBuilder::new(), &work, &identity).unwrap();
        assert_eq!(output.artifact_count, 0);

        let pem = fs::read_to_string(&identity.certificate_path).unwrap();
        let index = verify_signed_index(&work.join(&output.signed_index), &pem).unwrap();
        assert_eq!(index.artifact_count(), 0);
    }

    #[test]
    fn test_tampered_index_rejected() {
        let dir = TempDir::new().unwrap();
        let identity = identity(dir.path());
        let work = workspace(dir.path(), &[("org.a_1.apk", "a")]);
        let output = build(&MockIndexBuilder::new(), &work, &identity).unwrap();

        let path = work.join(&output.signed_index);
        let mut envelope: Envelope = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        envelope.payload = base64::engine::general_purpose::STANDARD.encode(b"{\"packages\":[]}");
        fs::write(&path, serde_json::to_vec(&envelope).unwrap()).unwrap();

        let pem = fs::read_to_string(&identity.certificate_path).unwrap();
        assert!(verify_signed_index(&path, &pem).is_err());
    }

    #[test]
    fn test_malformed_artifact_and_bad_passphrase() {
        let dir = TempDir::new().unwrap();
        let mut identity = identity(dir.path());

        let work = workspace(dir.path(), &[("org.a_1.apk", "CORRUPT")]);
        let err = build(&MockIndexBuilder::new(), &work, &identity).unwrap_err();
        assert!(err.to_string().contains("malformed artifact"));

        identity.passphrases = Passphrases::from_config(Some("wrong"), None).unwrap();
        let err = build(&MockIndexBuilder::new(), &work, &identity).unwrap_err();
        assert!(err.to_string().contains("password was incorrect"));
    }

    #[test]
    fn test_injected_failure_then_heal() {
        let dir = TempDir::new().unwrap();
        let identity = identity(dir.path());
        let work = workspace(dir.path(), &[]);
        let builder = MockIndexBuilder::failing("disk full");

        assert!(build(&builder, &work, &identity).is_err());
        builder.heal();
        assert!(build(&builder, &work, &identity).is_ok());
        assert_eq!(builder.build_calls(), 2);
    }
}
