//! Object-store mirror through the provider CLI
//!
//! GCS: `gsutil -m rsync -r -d`, S3: `aws s3 sync --delete`. Both prune
//! objects that are no longer in the tree. The landing page is copied to the
//! bucket root afterwards.

use std::path::Path;
use std::time::Instant;

use repo_tree::{ExcludeRules, TreeManifest};
use tracing::{info, warn};

use super::{Mirror, MirrorSyncError, SyncReport, SyncRequest};
use crate::config::StoreProvider;
use crate::process::{self, CommandSpec};
use crate::timeout::Deadline;

/// Bucket mirror
#[derive(Debug, Clone)]
pub struct ObjectStoreMirror {
    name: String,
    provider: StoreProvider,
    bucket: String,
    prefix: String,
    rules: ExcludeRules,
    program: String,
}

impl ObjectStoreMirror {
    pub fn new(
        name: impl Into<String>,
        provider: StoreProvider,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        rules: ExcludeRules,
    ) -> Self {
        let program = match provider {
            StoreProvider::Gcs => "gsutil",
            StoreProvider::S3 => "aws",
        };
        Self {
            name: name.into(),
            provider,
            bucket: bucket.into(),
            prefix: prefix.into().trim_matches('/').to_string(),
            rules,
            program: program.to_string(),
        }
    }

    /// Use a different executable for the provider CLI
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn scheme(&self) -> &'static str {
        match self.provider {
            StoreProvider::Gcs => "gs",
            StoreProvider::S3 => "s3",
        }
    }

    /// `gs://bucket/prefix` or `s3://bucket/prefix`
    pub fn tree_url(&self) -> String {
        if self.prefix.is_empty() {
            format!("{}://{}", self.scheme(), self.bucket)
        } else {
            format!("{}://{}/{}", self.scheme(), self.bucket, self.prefix)
        }
    }

    fn landing_url(&self) -> String {
        format!("{}://{}/index.html", self.scheme(), self.bucket)
    }

    fn sync_command(&self, tree: &Path) -> CommandSpec {
        let tree = tree.to_string_lossy().into_owned();
        match self.provider {
            StoreProvider::Gcs => {
                let mut cmd = CommandSpec::new(&self.program).args(["-m", "rsync", "-r", "-d"]);
                if !self.rules.patterns().is_empty() {
                    cmd = cmd.arg("-x").arg(exclude_regex(self.rules.patterns()));
                }
                cmd.arg(tree).arg(self.tree_url())
            }
            StoreProvider::S3 => {
                let mut cmd = CommandSpec::new(&self.program).args(["s3", "sync", "--delete"]);
                for pattern in self.rules.patterns() {
                    cmd = cmd.arg("--exclude").arg(pattern);
                }
                cmd.arg(tree).arg(self.tree_url())
            }
        }
    }

    fn landing_command(&self, landing: &Path) -> CommandSpec {
        let landing = landing.to_string_lossy().into_owned();
        match self.provider {
            StoreProvider::Gcs => CommandSpec::new(&self.program)
                .arg("cp")
                .arg(landing)
                .arg(self.landing_url()),
            StoreProvider::S3 => CommandSpec::new(&self.program)
                .args(["s3", "cp"])
                .arg(landing)
                .arg(self.landing_url()),
        }
    }

    fn run(
        &self,
        command: &CommandSpec,
        deadline: &Deadline,
        request: &SyncRequest<'_>,
    ) -> Result<(), MirrorSyncError> {
        let log_path = request.log_path(&self.name);
        let outcome = process::run(command, deadline.remaining(), log_path.as_deref())
            .map_err(|e| MirrorSyncError::Unreachable(e.to_string()))?;

        if outcome.timed_out {
            return Err(MirrorSyncError::Timeout(deadline.limit()));
        }
        if !outcome.success() {
            warn!(
                mirror = %self.name,
                command = %command.display(),
                failure = %outcome.describe_failure(),
                "object store command failed"
            );
            return Err(MirrorSyncError::Command(outcome.describe_failure()));
        }
        Ok(())
    }
}

/// gsutil takes one Python regex for exclusions; translate the globs
fn exclude_regex(patterns: &[String]) -> String {
    let alternatives: Vec<String> = patterns
        .iter()
        .map(|glob| {
            let mut re = String::from("(^|.*/)");
            for c in glob.chars() {
                match c {
                    '*' => re.push_str("[^/]*"),
                    '?' => re.push_str("[^/]"),
                    '.' | '+' | '(' | ')' | '|' | '^' | '$' | '{' | '}' | '[' | ']' | '\\' => {
                        re.push('\\');
                        re.push(c);
                    }
                    _ => re.push(c),
                }
            }
            re.push('$');
            re
        })
        .collect();
    alternatives.join("|")
}

impl Mirror for ObjectStoreMirror {
    fn name(&self) -> &str {
        &self.name
    }

    fn sync(&self, request: &SyncRequest<'_>) -> Result<SyncReport, MirrorSyncError> {
        let start = Instant::now();
        let deadline = Deadline::after(request.timeout);
        let source = TreeManifest::scan_with(request.tree, &self.rules)
            .map_err(|e| MirrorSyncError::Tree(e.to_string()))?;

        self.run(&self.sync_command(request.tree), &deadline, request)?;
        self.run(&self.landing_command(request.landing_page), &deadline, request)?;

        info!(
            mirror = %self.name,
            build_id = %request.build_id,
            target = %self.tree_url(),
            files = source.len(),
            "object store synced"
        );

        Ok(SyncReport {
            files: source.len(),
            bytes: source.total_bytes(),
            uploaded: None,
            deleted: None,
            unchanged: None,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
