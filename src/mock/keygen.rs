//! Mock key generator
//!
//! Keystore: JSON holding an ed25519 secret key and a digest of the store
//! passphrase. Certificate: a PEM block whose DER bytes are a fixed tag
//! followed by the public key, so fingerprints behave like real ones.

use base64::Engine;
use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{FailureConfig, FailureInjector, MockOperation};
use crate::identity::{der_to_pem, pem_to_der, IdentityError, KeyGenerator, KeySpec, Passphrases};

const KEYSTORE_FORMAT: &str = "fdroid-repo/mock-keystore@1";
const CERT_TAG: &[u8] = b"MOCKCERT";

#[derive(Debug, Serialize, Deserialize)]
struct MockKeystore {
    format: String,
    alias: String,
    dname: String,
    secret_key: String,
    store_pass_sha256: String,
}

fn pass_digest(pass: &str) -> String {
    hex::encode(Sha256::digest(pass.as_bytes()))
}

/// Open a mock keystore, checking the passphrase
pub(crate) fn open_keystore(path: &Path, store_pass: &str) -> Result<SigningKey, String> {
    let json = fs::read_to_string(path).map_err(|e| format!("cannot read keystore: {}", e))?;
    let keystore: MockKeystore =
        serde_json::from_str(&json).map_err(|e| format!("corrupt keystore: {}", e))?;
    if keystore.format != KEYSTORE_FORMAT {
        return Err(format!("unknown keystore format {}", keystore.format));
    }
    if keystore.store_pass_sha256 != pass_digest(store_pass) {
        return Err("keystore password was incorrect".to_string());
    }

    let secret = base64::engine::general_purpose::STANDARD
        .decode(&keystore.secret_key)
        .map_err(|e| format!("corrupt key: {}", e))?;
    let secret: [u8; 32] = secret
        .try_into()
        .map_err(|_| "corrupt key: wrong length".to_string())?;
    Ok(SigningKey::from_bytes(&secret))
}

/// Public key carried by a mock certificate
pub(crate) fn certificate_public_key(pem: &str) -> Result<VerifyingKey, String> {
    let der = pem_to_der(pem).map_err(|e| e.to_string())?;
    let key = der
        .strip_prefix(CERT_TAG)
        .ok_or_else(|| "not a mock certificate".to_string())?;
    let key: [u8; 32] = key
        .try_into()
        .map_err(|_| "certificate key has wrong length".to_string())?;
    VerifyingKey::from_bytes(&key).map_err(|e| e.to_string())
}

fn certificate_pem(key: &VerifyingKey) -> String {
    let mut der = CERT_TAG.to_vec();
    der.extend_from_slice(key.as_bytes());
    der_to_pem(&der)
}

/// In-process key generator with call counting and failure injection
#[derive(Debug, Clone, Default)]
pub struct MockKeyGenerator {
    failures: Arc<Mutex<FailureInjector>>,
    generate_calls: Arc<AtomicU32>,
    export_calls: Arc<AtomicU32>,
}

impl MockKeyGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every generation fails with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        let generator = Self::new();
        generator.inject(MockOperation::Generate, FailureConfig::error(message));
        generator
    }

    /// Slow down generation (widens race windows in tests)
    pub fn with_delay(self, delay: Duration) -> Self {
        self.inject(MockOperation::Generate, FailureConfig::delay(delay));
        self
    }

    pub fn inject(&self, op: MockOperation, config: FailureConfig) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.inject(op, config);
        }
    }

    pub fn generate_calls(&self) -> u32 {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn export_calls(&self) -> u32 {
        self.export_calls.load(Ordering::SeqCst)
    }

    fn check(&self, op: MockOperation) -> Result<(), IdentityError> {
        let (delay, error) = match self.failures.lock() {
            Ok(mut failures) => failures.check(op),
            Err(_) => (None, None),
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        match error {
            Some(message) => Err(IdentityError::Generation(message)),
            None => Ok(()),
        }
    }
}

impl KeyGenerator for MockKeyGenerator {
    fn generate(
        &self,
        spec: &KeySpec,
        keystore: &Path,
        certificate: &Path,
        passphrases: &Passphrases,
    ) -> Result<(), IdentityError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.check(MockOperation::Generate)?;

        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let record = MockKeystore {
            format: KEYSTORE_FORMAT.to_string(),
            alias: spec.key_alias.clone(),
            dname: spec.dname.clone(),
            secret_key: base64::engine::general_purpose::STANDARD.encode(signing_key.to_bytes()),
            store_pass_sha256: pass_digest(&passphrases.keystore),
        };
        let json = serde_json::to_string_pretty(&record)
            .map_err(|e| IdentityError::Generation(e.to_string()))?;

        fs::write(keystore, json)?;
        fs::write(certificate, certificate_pem(&signing_key.verifying_key()))?;
        Ok(())
    }

    fn export_certificate(
        &self,
        _spec: &KeySpec,
        keystore: &Path,
        certificate: &Path,
        passphrases: &Passphrases,
    ) -> Result<(), IdentityError> {
        self.export_calls.fetch_add(1, Ordering::SeqCst);
        self.check(MockOperation::ExportCertificate)?;

        let signing_key =
            open_keystore(keystore, &passphrases.keystore).map_err(IdentityError::Generation)?;
        fs::write(certificate, certificate_pem(&signing_key.verifying_key()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Fingerprint;
    use tempfile::TempDir;

    fn spec() -> KeySpec {
        KeySpec {
            key_alias: "repokey".to_string(),
            dname: "CN=test".to_string(),
            validity_days: 1,
            key_size: 4096,
        }
    }

    #[test]
    fn test_generate_and_reexport_same_certificate() {
        let dir = TempDir::new().unwrap();
        let ks = dir.path().join("ks");
        let cert = dir.path().join("cert.pem");
        let pass = Passphrases::generate();
        let generator = MockKeyGenerator::new();

        generator.generate(&spec(), &ks, &cert, &pass).unwrap();
        let first = fs::read_to_string(&cert).unwrap();
        fs::remove_file(&cert).unwrap();

        generator.export_certificate(&spec(), &ks, &cert, &pass).unwrap();
        let second = fs::read_to_string(&cert).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            Fingerprint::of_pem(&first).unwrap(),
            Fingerprint::of_pem(&second).unwrap()
        );
        assert!(certificate_public_key(&first).is_ok());
    }

    #[test]
    fn test_wrong_passphrase_rejected() {
        let dir = TempDir::new().unwrap();
        let ks = dir.path().join("ks");
        let pass = Passphrases::from_config(Some("right"), None).unwrap();
        MockKeyGenerator::new()
            .generate(&spec(), &ks, &dir.path().join("c"), &pass)
            .unwrap();

        assert!(open_keystore(&ks, "right").is_ok());
        assert!(open_keystore(&ks, "wrong")
            .unwrap_err()
            .contains("password was incorrect"));
    }

    #[test]
    fn test_failing_generator() {
        let dir = TempDir::new().unwrap();
        let generator = MockKeyGenerator::failing("no entropy");
        let err = generator
            .generate(
                &spec(),
                &dir.path().join("ks"),
                &dir.path().join("c"),
                &Passphrases::generate(),
            )
            .unwrap_err();

        assert!(err.to_string().contains("no entropy"));
        assert_eq!(generator.generate_calls(), 1);
        assert!(!dir.path().join("ks").exists());
    }
}
