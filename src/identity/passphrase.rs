//! Keystore passphrases
//!
//! Resolved from configuration first, then from the persisted file written
//! when the identity was created. A random passphrase is generated only when
//! a new identity is being created and nothing was supplied.

use base64::Engine;
use rand::RngCore;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

const KEYSTORE_VAR: &str = "KEYSTORE_PASS";
const KEY_VAR: &str = "KEY_PASS";

/// Keystore and key passphrases
#[derive(Clone, PartialEq, Eq)]
pub struct Passphrases {
    pub keystore: String,
    pub key: String,
}

impl fmt::Debug for Passphrases {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Passphrases")
            .field("keystore", &"[REDACTED]")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl Passphrases {
    /// Passphrases from configuration; the key passphrase defaults to the
    /// keystore one (PKCS#12 keystores use a single password).
    pub fn from_config(keystore: Option<&str>, key: Option<&str>) -> Option<Self> {
        let keystore = keystore.filter(|s| !s.is_empty())?;
        Some(Self {
            keystore: keystore.to_string(),
            key: key
                .filter(|s| !s.is_empty())
                .unwrap_or(keystore)
                .to_string(),
        })
    }

    /// Fresh random passphrase (32 bytes, URL-safe base64) used for both
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let pass = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
        Self {
            keystore: pass.clone(),
            key: pass,
        }
    }

    /// Persist to `path` with owner-only permissions (write-then-rename)
    pub fn persist(&self, path: &Path) -> io::Result<()> {
        let contents = format!("{}={}\n{}={}\n", KEYSTORE_VAR, self.keystore, KEY_VAR, self.key);
        let temp_path = path.with_extension("tmp");

        {
            let mut file = open_private(&temp_path)?;
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;
        }

        fs::rename(&temp_path, path)
    }

    /// Load a persisted passphrase file
    pub fn load(path: &Path) -> io::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let mut keystore = None;
        let mut key = None;

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((name, value)) = line.split_once('=') {
                match name.trim() {
                    KEYSTORE_VAR => keystore = Some(value.to_string()),
                    KEY_VAR => key = Some(value.to_string()),
                    _ => {}
                }
            }
        }

        Self::from_config(keystore.as_deref(), key.as_deref()).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} missing from {}", KEYSTORE_VAR, path.display()),
            )
        })
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_config_key_defaults_to_keystore() {
        let pass = Passphrases::from_config(Some("store"), None).unwrap();
        assert_eq!(pass.keystore, "store");
        assert_eq!(pass.key, "store");

        let pass = Passphrases::from_config(Some("store"), Some("key")).unwrap();
        assert_eq!(pass.key, "key");

        assert!(Passphrases::from_config(None, Some("key")).is_none());
        assert!(Passphrases::from_config(Some(""), None).is_none());
    }

    #[test]
    fn test_generate_is_random() {
        let a = Passphrases::generate();
        let b = Passphrases::generate();
        assert_ne!(a.keystore, b.keystore);
        assert_eq!(a.keystore.len(), 43);
    }

    #[test]
    fn test_persist_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("passphrases.env");
        let pass = Passphrases::from_config(Some("a=b"), Some("k")).unwrap();

        pass.persist(&path).unwrap();
        assert_eq!(Passphrases::load(&path).unwrap(), pass);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_debug_redacts() {
        let pass = Passphrases::from_config(Some("hunter2"), None).unwrap();
        assert!(!format!("{:?}", pass).contains("hunter2"));
    }
}
