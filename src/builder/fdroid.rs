//! Production index builder: `fdroid update`

use std::fs;

use tracing::info;

use super::{BuildOutput, BuildRequest, IndexBuildError, IndexBuilder};
use crate::config::BuilderSettings;
use crate::process::{self, CommandSpec};
use crate::store::parse_package_file;

/// Runs the fdroidserver tool in the build workspace
#[derive(Debug, Clone)]
pub struct FdroidServerBuilder {
    command: String,
    args: Vec<String>,
    signed_index: String,
}

impl FdroidServerBuilder {
    pub fn new(settings: &BuilderSettings) -> Self {
        Self {
            command: settings.command.clone(),
            args: settings.args.clone(),
            signed_index: settings.signed_index.clone(),
        }
    }

    fn command(&self, request: &BuildRequest<'_>) -> CommandSpec {
        CommandSpec::new(&self.command)
            .args(self.args.iter().cloned())
            .cwd(request.work_dir)
    }
}

impl IndexBuilder for FdroidServerBuilder {
    fn build(&self, request: &BuildRequest<'_>) -> Result<BuildOutput, IndexBuildError> {
        let command = self.command(request);
        info!(build_id = %request.build_id, command = %command.display(), "running index builder");

        let outcome = process::run(&command, request.timeout, request.log_path.as_deref())
            .map_err(|e| IndexBuildError::Builder(e.to_string()))?;

        if outcome.timed_out {
            return Err(IndexBuildError::Timeout(request.timeout));
        }
        if !outcome.success() {
            return Err(IndexBuildError::Builder(outcome.describe_failure()));
        }

        let mut artifact_count = 0;
        for dirent in fs::read_dir(request.work_dir.join("repo"))? {
            let name = dirent?.file_name().to_string_lossy().into_owned();
            if parse_package_file(&name).is_some() {
                artifact_count += 1;
            }
        }

        Ok(BuildOutput {
            signed_index: self.signed_index.clone(),
            artifact_count,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::identity::{Fingerprint, Passphrases, SigningIdentity};
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tempfile::TempDir;

    fn identity() -> SigningIdentity {
        SigningIdentity {
            keystore_path: PathBuf::from("/nonexistent/keystore.p12"),
            certificate_path: PathBuf::from("/nonexistent/repo-cert.pem"),
            key_alias: "repokey".to_string(),
            dname: "CN=test".to_string(),
            passphrases: Passphrases::generate(),
            fingerprint: Fingerprint::of_der(b"cert"),
            created: false,
        }
    }

    fn settings(script: &str) -> BuilderSettings {
        BuilderSettings {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            signed_index: "repo/index-v1.jar".to_string(),
        }
    }

    fn request<'a>(dir: &'a Path, identity: &'a SigningIdentity, timeout: Duration) -> BuildRequest<'a> {
        BuildRequest {
            build_id: "01A",
            work_dir: dir,
            identity,
            timeout,
            log_path: None,
        }
    }

    #[test]
    fn test_runs_in_workspace_and_counts() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("repo")).unwrap();
        fs::write(dir.path().join("repo/org.a_1.apk"), "a").unwrap();
        let identity = identity();

        let builder = FdroidServerBuilder::new(&settings("printf signed > repo/index-v1.jar"));
        let output = builder
            .build(&request(dir.path(), &identity, Duration::from_secs(10)))
            .unwrap();

        assert_eq!(output.artifact_count, 1);
        assert_eq!(output.signed_index, "repo/index-v1.jar");
        assert!(dir.path().join("repo/index-v1.jar").is_file());
    }

    #[test]
    fn test_failure_and_timeout() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("repo")).unwrap();
        let identity = identity();

        let failing = FdroidServerBuilder::new(&settings("echo 'bad apk' >&2; exit 1"));
        let err = failing
            .build(&request(dir.path(), &identity, Duration::from_secs(10)))
            .unwrap_err();
        assert!(err.to_string().contains("bad apk"));

        let slow = FdroidServerBuilder::new(&settings("sleep 30"));
        let err = slow
            .build(&request(dir.path(), &identity, Duration::from_millis(200)))
            .unwrap_err();
        assert!(matches!(err, IndexBuildError::Timeout(_)));
    }
}
