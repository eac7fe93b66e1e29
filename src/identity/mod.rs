//! Repository signing identity
//!
//! A repository has exactly one signing identity: a keystore holding the key
//! pair, the exported self-signed certificate, and the passphrases needed by
//! automation. It is created once, lazily, and never replaced implicitly;
//! replacing it would make every client that pinned the old fingerprint
//! reject the repository.
//!
//! Creation is serialized by an advisory lock and repeated presence check.
//! Key material is generated in a staging directory and committed by linking
//! the keystore into place, which fails rather than overwrites if another
//! creator got there first.

mod fingerprint;
mod keytool;
mod passphrase;

pub use fingerprint::{der_to_pem, pem_to_der, Fingerprint};
pub use keytool::KeytoolGenerator;
pub use passphrase::Passphrases;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::Settings;
use crate::layout::RepoLayout;
use crate::lock::{LockError, RepoLock};

/// Keystore file name; its presence marks an existing identity
pub const KEYSTORE_FILE: &str = "keystore.p12";

/// Exported certificate (PEM)
pub const CERTIFICATE_FILE: &str = "repo-cert.pem";

/// Persisted passphrases (mode 0600)
pub const PASSPHRASE_FILE: &str = "passphrases.env";

/// Errors from identity operations
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Key pair or certificate generation failed; fatal for a cycle
    #[error("signing identity creation failed: {0}")]
    Generation(String),

    #[error("no signing identity at {0}")]
    Absent(PathBuf),

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("passphrase unavailable: {0}")]
    Passphrase(String),

    #[error("identity lock: {0}")]
    Lock(#[from] LockError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Parameters of a new key pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpec {
    pub key_alias: String,
    pub dname: String,
    pub validity_days: u32,
    pub key_size: u32,
}

/// Produces key material. Implementations write a keystore and a PEM
/// certificate to the exact paths given.
pub trait KeyGenerator: Send + Sync {
    /// Create a new key pair in `keystore` and export its certificate
    fn generate(
        &self,
        spec: &KeySpec,
        keystore: &Path,
        certificate: &Path,
        passphrases: &Passphrases,
    ) -> Result<(), IdentityError>;

    /// Export the certificate of an existing keystore
    fn export_certificate(
        &self,
        spec: &KeySpec,
        keystore: &Path,
        certificate: &Path,
        passphrases: &Passphrases,
    ) -> Result<(), IdentityError>;
}

/// Where the identity lives and how to create it
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Directory holding keystore, certificate and passphrase file
    pub dir: PathBuf,
    /// Directory for the creation lock
    pub lock_dir: PathBuf,
    /// How long to wait for a concurrent creator
    pub lock_timeout: Duration,
    pub spec: KeySpec,
    /// Passphrases supplied by configuration, if any
    pub supplied: Option<Passphrases>,
}

impl IdentityConfig {
    pub fn from_settings(settings: &Settings, layout: &RepoLayout) -> Self {
        Self {
            dir: layout.identity_dir(),
            lock_dir: layout.locks_dir(),
            lock_timeout: settings.timeouts.keygen() + Duration::from_secs(30),
            spec: KeySpec {
                key_alias: settings.identity.key_alias.clone(),
                dname: settings.identity.dname.clone(),
                validity_days: settings.identity.validity_days,
                key_size: settings.identity.key_size,
            },
            supplied: Passphrases::from_config(
                settings.keystore_pass.as_deref(),
                settings.key_pass.as_deref(),
            ),
        }
    }

    pub fn keystore_path(&self) -> PathBuf {
        self.dir.join(KEYSTORE_FILE)
    }

    pub fn certificate_path(&self) -> PathBuf {
        self.dir.join(CERTIFICATE_FILE)
    }

    pub fn passphrase_path(&self) -> PathBuf {
        self.dir.join(PASSPHRASE_FILE)
    }
}

/// A loaded signing identity, read-only after creation
#[derive(Debug, Clone)]
pub struct SigningIdentity {
    pub keystore_path: PathBuf,
    pub certificate_path: PathBuf,
    pub key_alias: String,
    pub dname: String,
    pub passphrases: Passphrases,
    pub fingerprint: Fingerprint,
    /// True when this call created the identity
    pub created: bool,
}

/// True when a keystore exists in the configured location
pub fn identity_exists(config: &IdentityConfig) -> bool {
    config.keystore_path().is_file()
}

/// Make sure a signing identity exists and load it.
///
/// A no-op when the identity already exists. Never overwrites.
pub fn ensure_signing_identity(
    config: &IdentityConfig,
    generator: &dyn KeyGenerator,
) -> Result<SigningIdentity, IdentityError> {
    if identity_exists(config) && config.certificate_path().is_file() {
        return load_signing_identity(config);
    }

    fs::create_dir_all(&config.dir)?;
    let _lock = RepoLock::acquire(&config.lock_dir, "identity", config.lock_timeout)?;

    // Another creator may have finished while we waited
    if identity_exists(config) {
        return load_or_repair(config, generator);
    }

    create(config, generator)
}

/// Load an existing identity without ever creating one
pub fn load_signing_identity(config: &IdentityConfig) -> Result<SigningIdentity, IdentityError> {
    if !identity_exists(config) {
        return Err(IdentityError::Absent(config.keystore_path()));
    }

    let pem = fs::read_to_string(config.certificate_path()).map_err(|e| {
        IdentityError::Certificate(format!(
            "cannot read {}: {}",
            config.certificate_path().display(),
            e
        ))
    })?;
    let fingerprint = Fingerprint::of_pem(&pem)?;

    Ok(SigningIdentity {
        keystore_path: config.keystore_path(),
        certificate_path: config.certificate_path(),
        key_alias: config.spec.key_alias.clone(),
        dname: config.spec.dname.clone(),
        passphrases: resolve_existing_passphrases(config)?,
        fingerprint,
        created: false,
    })
}

/// Fingerprint of the existing identity's certificate
pub fn read_fingerprint(config: &IdentityConfig) -> Result<Fingerprint, IdentityError> {
    if !identity_exists(config) {
        return Err(IdentityError::Absent(config.keystore_path()));
    }
    let pem = fs::read_to_string(config.certificate_path())
        .map_err(|_| IdentityError::Absent(config.certificate_path()))?;
    Fingerprint::of_pem(&pem)
}

fn resolve_existing_passphrases(config: &IdentityConfig) -> Result<Passphrases, IdentityError> {
    if let Some(supplied) = &config.supplied {
        return Ok(supplied.clone());
    }
    Passphrases::load(&config.passphrase_path()).map_err(|e| {
        IdentityError::Passphrase(format!(
            "none configured and {} unreadable: {}",
            config.passphrase_path().display(),
            e
        ))
    })
}

/// Load; if only the certificate export is missing, re-export it.
///
/// Caller holds the identity lock.
fn load_or_repair(
    config: &IdentityConfig,
    generator: &dyn KeyGenerator,
) -> Result<SigningIdentity, IdentityError> {
    if !config.certificate_path().is_file() {
        warn!(
            certificate = %config.certificate_path().display(),
            "certificate missing next to existing keystore, re-exporting"
        );
        let passphrases = resolve_existing_passphrases(config)?;
        generator.export_certificate(
            &config.spec,
            &config.keystore_path(),
            &config.certificate_path(),
            &passphrases,
        )?;
    }
    load_signing_identity(config)
}

fn create(
    config: &IdentityConfig,
    generator: &dyn KeyGenerator,
) -> Result<SigningIdentity, IdentityError> {
    let passphrases = match &config.supplied {
        Some(supplied) => supplied.clone(),
        None => match Passphrases::load(&config.passphrase_path()) {
            Ok(persisted) => persisted,
            Err(_) => Passphrases::generate(),
        },
    };

    let staging = config
        .dir
        .join(format!(".staging-{}", ulid::Ulid::new().to_string().to_lowercase()));
    fs::create_dir_all(&staging)?;

    let result = create_in_staging(config, generator, &passphrases, &staging);
    let _ = fs::remove_dir_all(&staging);

    let Some(fingerprint) = result? else {
        warn!("signing identity appeared concurrently, keeping the existing one");
        return load_or_repair(config, generator);
    };
    info!(
        fingerprint = %fingerprint,
        keystore = %config.keystore_path().display(),
        "created repository signing identity"
    );

    let mut identity = load_signing_identity(config)?;
    identity.created = true;
    Ok(identity)
}

/// Generate into `staging` and commit. `None` when an existing keystore won
/// the commit, in which case nothing outside `staging` was touched.
fn create_in_staging(
    config: &IdentityConfig,
    generator: &dyn KeyGenerator,
    passphrases: &Passphrases,
    staging: &Path,
) -> Result<Option<Fingerprint>, IdentityError> {
    let staged_keystore = staging.join(KEYSTORE_FILE);
    let staged_cert = staging.join(CERTIFICATE_FILE);
    let staged_passphrases = staging.join(PASSPHRASE_FILE);

    generator.generate(&config.spec, &staged_keystore, &staged_cert, passphrases)?;

    if !staged_keystore.is_file() {
        return Err(IdentityError::Generation(
            "generator produced no keystore".to_string(),
        ));
    }
    let pem = fs::read_to_string(&staged_cert)
        .map_err(|e| IdentityError::Generation(format!("generator produced no certificate: {}", e)))?;
    let fingerprint = Fingerprint::of_pem(&pem)?;

    passphrases
        .persist(&staged_passphrases)
        .map_err(|e| IdentityError::Generation(format!("persisting passphrases: {}", e)))?;

    // Commit point: link fails instead of replacing an existing keystore
    match fs::hard_link(&staged_keystore, config.keystore_path()) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(None),
        Err(e) => return Err(IdentityError::Generation(format!("committing keystore: {}", e))),
    }

    // Passphrases before the certificate: a readable certificate implies both
    fs::rename(&staged_passphrases, config.passphrase_path())
        .map_err(|e| IdentityError::Generation(format!("committing passphrases: {}", e)))?;
    fs::rename(&staged_cert, config.certificate_path())
        .map_err(|e| IdentityError::Generation(format!("committing certificate: {}", e)))?;

    Ok(Some(fingerprint))
}
