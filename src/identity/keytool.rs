//! Key generation through the JDK `keytool`
//!
//! The index builder reads a PKCS#12 keystore, so the identity is produced by
//! the same tool operators would use by hand. Passphrases travel through the
//! child environment (`-storepass:env`), never the command line.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::info;

use super::{IdentityError, KeyGenerator, KeySpec, Passphrases};
use crate::process::{self, CommandSpec};

const STOREPASS_ENV: &str = "FDROID_REPO_STOREPASS";
const KEYPASS_ENV: &str = "FDROID_REPO_KEYPASS";

/// `keytool`-backed key generator
#[derive(Debug, Clone)]
pub struct KeytoolGenerator {
    keytool: String,
    timeout: Duration,
    log_path: Option<PathBuf>,
}

impl KeytoolGenerator {
    pub fn new(keytool: impl Into<String>, timeout: Duration) -> Self {
        Self {
            keytool: keytool.into(),
            timeout,
            log_path: None,
        }
    }

    /// Append keytool output to `path`
    pub fn with_log(mut self, path: PathBuf) -> Self {
        self.log_path = Some(path);
        self
    }

    fn genkeypair_command(
        &self,
        spec: &KeySpec,
        keystore: &Path,
        passphrases: &Passphrases,
    ) -> CommandSpec {
        CommandSpec::new(&self.keytool)
            .args([
                "-genkeypair",
                "-noprompt",
                "-storetype",
                "PKCS12",
                "-keyalg",
                "RSA",
                "-sigalg",
                "SHA256withRSA",
            ])
            .arg("-keystore")
            .arg(keystore.to_string_lossy())
            .arg("-alias")
            .arg(&spec.key_alias)
            .arg("-keysize")
            .arg(spec.key_size.to_string())
            .arg("-validity")
            .arg(spec.validity_days.to_string())
            .arg("-dname")
            .arg(&spec.dname)
            .arg("-storepass:env")
            .arg(STOREPASS_ENV)
            .arg("-keypass:env")
            .arg(KEYPASS_ENV)
            .env(STOREPASS_ENV, &passphrases.keystore)
            .env(KEYPASS_ENV, &passphrases.key)
    }

    fn exportcert_command(
        &self,
        spec: &KeySpec,
        keystore: &Path,
        certificate: &Path,
        passphrases: &Passphrases,
    ) -> CommandSpec {
        CommandSpec::new(&self.keytool)
            .args(["-exportcert", "-rfc", "-noprompt", "-storetype", "PKCS12"])
            .arg("-keystore")
            .arg(keystore.to_string_lossy())
            .arg("-alias")
            .arg(&spec.key_alias)
            .arg("-file")
            .arg(certificate.to_string_lossy())
            .arg("-storepass:env")
            .arg(STOREPASS_ENV)
            .env(STOREPASS_ENV, &passphrases.keystore)
    }

    fn run(&self, command: &CommandSpec, what: &str) -> Result<(), IdentityError> {
        let outcome = process::run(command, self.timeout, self.log_path.as_deref())
            .map_err(|e| IdentityError::Generation(format!("{}: {}", what, e)))?;

        if outcome.success() {
            Ok(())
        } else {
            Err(IdentityError::Generation(format!(
                "{}: {}",
                what,
                outcome.describe_failure()
            )))
        }
    }
}

impl KeyGenerator for KeytoolGenerator {
    fn generate(
        &self,
        spec: &KeySpec,
        keystore: &Path,
        certificate: &Path,
        passphrases: &Passphrases,
    ) -> Result<(), IdentityError> {
        info!(alias = %spec.key_alias, key_size = spec.key_size, "generating repository signing key");
        self.run(
            &self.genkeypair_command(spec, keystore, passphrases),
            "keytool -genkeypair",
        )?;
        self.export_certificate(spec, keystore, certificate, passphrases)
    }

    fn export_certificate(
        &self,
        spec: &KeySpec,
        keystore: &Path,
        certificate: &Path,
        passphrases: &Passphrases,
    ) -> Result<(), IdentityError> {
        self.run(
            &self.exportcert_command(spec, keystore, certificate, passphrases),
            "keytool -exportcert",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> KeySpec {
        KeySpec {
            key_alias: "repokey".to_string(),
            dname: "CN=test, OU=F-Droid".to_string(),
            validity_days: 10000,
            key_size: 4096,
        }
    }

    #[test]
    fn test_genkeypair_command_keeps_secrets_out_of_argv() {
        let generator = KeytoolGenerator::new("keytool", Duration::from_secs(60));
        let pass = Passphrases::from_config(Some("hunter2"), None).unwrap();
        let cmd = generator.genkeypair_command(&spec(), Path::new("/tmp/ks.p12"), &pass);

        let line = cmd.display();
        assert!(line.contains("-genkeypair"));
        assert!(line.contains("-validity 10000"));
        assert!(line.contains("-alias repokey"));
        assert!(line.contains("-storepass:env FDROID_REPO_STOREPASS"));
        assert!(!line.contains("hunter2"));
        assert!(cmd
            .env
            .iter()
            .any(|(k, v)| k == STOREPASS_ENV && v == "hunter2"));
    }

    #[test]
    fn test_exportcert_command() {
        let generator = KeytoolGenerator::new("/opt/jdk/bin/keytool", Duration::from_secs(60));
        let pass = Passphrases::from_config(Some("p"), None).unwrap();
        let cmd = generator.exportcert_command(
            &spec(),
            Path::new("/r/keystore.p12"),
            Path::new("/r/repo-cert.pem"),
            &pass,
        );

        assert_eq!(cmd.program, "/opt/jdk/bin/keytool");
        assert!(cmd.display().contains("-exportcert -rfc"));
        assert!(cmd.display().contains("-file /r/repo-cert.pem"));
    }

    #[test]
    fn test_missing_keytool_is_generation_error() {
        let generator = KeytoolGenerator::new("no-such-keytool-binary", Duration::from_secs(5));
        let pass = Passphrases::generate();
        let dir = tempfile::TempDir::new().unwrap();

        let err = generator
            .generate(
                &spec(),
                &dir.path().join("ks.p12"),
                &dir.path().join("cert.pem"),
                &pass,
            )
            .unwrap_err();
        assert!(matches!(err, IdentityError::Generation(_)));
    }
}
