//! Bootstrap/build/publish orchestration
//!
//! One cycle is a linear flow driven through the cycle state machine:
//!
//! 1. ensure the signing identity exists (fatal on failure)
//! 2. regenerate `config.yml` and the landing page, written only on change
//! 3. build a new signed index when the inputs changed (or when forced)
//! 4. publish the authoritative index to every mirror concurrently
//!
//! A failed build leaves the previously committed index authoritative and
//! the cycle at IDENTITY_READY. Whole cycles are serialized per repository
//! root by an advisory lock.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::builder::{
    render_config_yml, BuildInputs, BuildRequest, BuildWorkspace, IndexBuildError, IndexBuilder,
};
use crate::config::{ConfigError, Settings};
use crate::identity::{
    ensure_signing_identity, read_fingerprint, Fingerprint, IdentityConfig, IdentityError,
    KeyGenerator, SigningIdentity,
};
use crate::index::{self, prune_builds, IndexError, RepositoryIndex};
use crate::landing::render_landing_page;
use crate::layout::{write_if_changed, RepoLayout};
use crate::lock::{LockError, RepoLock};
use crate::mirror::{Mirror, SyncRequest};
use crate::publish::{self, PublishReport, RetryPolicy};
use crate::state::{CycleStateData, CycleStateError};
use crate::store::{ArtifactEntry, ArtifactStore, MetadataStore, StoreError};
use crate::summary::{CycleReport, ExitCode, FailureKind};

/// Orchestrator errors
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Build(#[from] IndexBuildError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("index record error: {0}")]
    Index(#[from] IndexError),

    #[error("cycle state error: {0}")]
    State(#[from] CycleStateError),

    #[error("repository busy: {0}")]
    Lock(#[from] LockError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl OrchestratorError {
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            OrchestratorError::Config(_) => Some(FailureKind::Config),
            OrchestratorError::Identity(IdentityError::Absent(_)) => {
                Some(FailureKind::IdentityAbsent)
            }
            OrchestratorError::Identity(_) => Some(FailureKind::IdentityCreation),
            OrchestratorError::Build(_) => Some(FailureKind::IndexBuild),
            OrchestratorError::Store(_) | OrchestratorError::Lock(_) => Some(FailureKind::Store),
            OrchestratorError::Index(_)
            | OrchestratorError::State(_)
            | OrchestratorError::Io(_) => None,
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> ExitCode {
        self.failure_kind()
            .map(|kind| kind.exit_code())
            .unwrap_or(ExitCode::Internal)
    }
}

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// A repository root with its resolved settings
#[derive(Debug, Clone)]
pub struct Repository {
    settings: Settings,
    layout: RepoLayout,
}

impl Repository {
    /// Validate settings and anchor the repository root to an absolute path
    pub fn open(mut settings: Settings) -> OrchestratorResult<Self> {
        settings.validate()?;
        if settings.repo_dir.is_relative() {
            settings.repo_dir = std::env::current_dir()?.join(&settings.repo_dir);
        }
        let layout = RepoLayout::new(settings.repo_dir.clone());
        Ok(Self { settings, layout })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn layout(&self) -> &RepoLayout {
        &self.layout
    }

    pub fn identity_config(&self) -> IdentityConfig {
        IdentityConfig::from_settings(&self.settings, &self.layout)
    }

    pub fn artifacts(&self) -> ArtifactStore {
        ArtifactStore::new(self.layout.artifacts_dir())
    }

    pub fn metadata(&self) -> MetadataStore {
        MetadataStore::new(self.layout.metadata_dir())
    }

    /// `add`: copy an APK into the Artifact Store
    pub fn add_artifact(&self, source: &Path) -> OrchestratorResult<ArtifactEntry> {
        Ok(self.artifacts().add(source, &self.metadata())?)
    }

    /// `list`: artifacts currently in the Artifact Store
    pub fn list_artifacts(&self) -> OrchestratorResult<Vec<ArtifactEntry>> {
        Ok(self.artifacts().list(&self.metadata())?)
    }

    /// `remove`: delete a package's artifacts and metadata; idempotent
    pub fn remove_package(&self, package_id: &str) -> OrchestratorResult<Vec<PathBuf>> {
        let removed = self.artifacts().remove(package_id, &self.metadata())?;
        info!(package = %package_id, removed = removed.len(), "removed package");
        Ok(removed)
    }

    /// `fingerprint`: never creates an identity
    pub fn fingerprint(&self) -> OrchestratorResult<Fingerprint> {
        Ok(read_fingerprint(&self.identity_config())?)
    }

    pub fn current_index(&self) -> OrchestratorResult<Option<RepositoryIndex>> {
        Ok(index::load_current(&self.layout)?)
    }

    /// State record of the most recent cycle
    pub fn last_cycle(&self) -> OrchestratorResult<Option<CycleStateData>> {
        Ok(CycleStateData::load_last(&self.layout.cycle_state())?)
    }

    fn cycle_lock_timeout(&self) -> Duration {
        let timeouts = &self.settings.timeouts;
        timeouts.keygen() + timeouts.build() + timeouts.mirror()
    }
}

/// What a cycle should do after ensuring the identity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleOptions {
    /// Rebuild even when inputs are unchanged
    pub force: bool,
    /// Publish to mirrors after the build step
    pub publish: bool,
}

/// Result of bootstrapping
#[derive(Debug, Clone)]
pub struct BootstrapReport {
    pub identity: SigningIdentity,
    pub config_written: bool,
    pub landing_written: bool,
}

/// Result of the build step
#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome {
    /// A new index was built and committed
    Built(RepositoryIndex),
    /// Inputs match the current index; nothing ran
    Unchanged(RepositoryIndex),
}

impl BuildOutcome {
    pub fn index(&self) -> &RepositoryIndex {
        match self {
            BuildOutcome::Built(index) | BuildOutcome::Unchanged(index) => index,
        }
    }

    pub fn rebuilt(&self) -> bool {
        matches!(self, BuildOutcome::Built(_))
    }

    pub fn into_index(self) -> RepositoryIndex {
        match self {
            BuildOutcome::Built(index) | BuildOutcome::Unchanged(index) => index,
        }
    }
}

/// Drives cycles against one repository with the given collaborators
pub struct Orchestrator<'a> {
    repo: &'a Repository,
    keys: &'a dyn KeyGenerator,
    builder: &'a dyn IndexBuilder,
    mirrors: &'a [Box<dyn Mirror>],
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        repo: &'a Repository,
        keys: &'a dyn KeyGenerator,
        builder: &'a dyn IndexBuilder,
        mirrors: &'a [Box<dyn Mirror>],
    ) -> Self {
        Self {
            repo,
            keys,
            builder,
            mirrors,
        }
    }

    /// `bootstrap`: ensure the identity and regenerate config and landing page
    pub fn bootstrap(&self) -> OrchestratorResult<BootstrapReport> {
        let _lock = self.cycle_lock()?;
        self.bootstrap_locked()
    }

    fn bootstrap_locked(&self) -> OrchestratorResult<BootstrapReport> {
        let settings = self.repo.settings();
        let layout = self.repo.layout();

        let identity = ensure_signing_identity(&self.repo.identity_config(), self.keys)?;
        if identity.created {
            info!(
                fingerprint = %identity.fingerprint.to_colon_hex(),
                "created repository signing identity"
            );
        }

        let config_written = write_if_changed(
            &layout.builder_config(),
            render_config_yml(settings, &identity).as_bytes(),
            true,
        )?;
        let landing_written = write_if_changed(
            &layout.landing_page(),
            render_landing_page(settings, &identity.fingerprint).as_bytes(),
            false,
        )?;

        Ok(BootstrapReport {
            identity,
            config_written,
            landing_written,
        })
    }

    /// Build and commit a new index when the inputs changed or `force` is set.
    ///
    /// Only `OrchestratorError::Build` is a recoverable build failure; the
    /// previously committed index is untouched by it.
    pub fn build_index(
        &self,
        identity: &SigningIdentity,
        force: bool,
    ) -> OrchestratorResult<BuildOutcome> {
        let settings = self.repo.settings();
        let layout = self.repo.layout();

        let config_yml = render_config_yml(settings, identity);
        let inputs = BuildInputs::collect(layout, &config_yml, &identity.fingerprint)?;
        let current = index::load_current(layout)?;

        if let Some(current) = current.as_ref() {
            if !force && current.inputs_sha256 == inputs.digest() {
                info!(
                    build_id = %current.build_id,
                    version = current.version,
                    "inputs unchanged, keeping current index"
                );
                return Ok(BuildOutcome::Unchanged(current.clone()));
            }
        }

        let build_id = Ulid::new().to_string();
        let version = current.as_ref().map(|c| c.version + 1).unwrap_or(1);
        info!(
            build_id = %build_id,
            version,
            artifacts = inputs.artifact_files,
            force,
            "building index"
        );

        let result = BuildWorkspace::prepare(layout, &build_id, &config_yml).and_then(|workspace| {
            self.run_build(&workspace, identity, inputs, version)
        });

        match result {
            Ok(record) => {
                match prune_builds(layout, &settings.retention, Some(record.build_id.as_str())) {
                    Ok(gc) if gc.deleted > 0 => {
                        info!(deleted = gc.deleted, "pruned old builds")
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "build retention failed"),
                }
                Ok(BuildOutcome::Built(record))
            }
            Err(e) => {
                warn!(build_id = %build_id, error = %e, "index build failed");
                if !settings.retention.keep_failed_builds {
                    discard_build(&layout.build_dir(&build_id));
                }
                Err(e.into())
            }
        }
    }

    fn run_build(
        &self,
        workspace: &BuildWorkspace,
        identity: &SigningIdentity,
        mut inputs: BuildInputs,
        version: u64,
    ) -> Result<RepositoryIndex, IndexBuildError> {
        let settings = self.repo.settings();
        let layout = self.repo.layout();

        let request = BuildRequest {
            build_id: &workspace.build_id,
            work_dir: &workspace.dir,
            identity,
            timeout: settings.timeouts.build(),
            log_path: Some(layout.logs_dir().join(format!("build-{}.log", workspace.build_id))),
        };
        let output = self.builder.build(&request)?;

        let signed = workspace.dir.join(&output.signed_index);
        match fs::metadata(&signed) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {}
            _ => return Err(IndexBuildError::Unsigned(signed)),
        }

        let adopted = self
            .repo
            .metadata()
            .adopt_missing(&workspace.metadata_dir())
            .map_err(|e| IndexBuildError::Workspace(format!("adopting metadata: {}", e)))?;
        if !adopted.is_empty() {
            info!(packages = ?adopted, "adopted default metadata records");
            // Recorded inputs must include the adopted records or the next
            // cycle would rebuild for nothing
            inputs.refresh_metadata(layout)?;
        }

        let record = RepositoryIndex::new(
            workspace.build_id.clone(),
            version,
            output.signed_index,
            output.artifact_count,
            inputs.digest(),
            identity.fingerprint.to_hex(),
        );
        index::commit(layout, &record).map_err(|e| IndexBuildError::Commit(e.to_string()))?;

        info!(
            build_id = %record.build_id,
            version = record.version,
            artifacts = record.artifact_count,
            "committed index"
        );
        Ok(record)
    }

    /// Sync `index` to every mirror; never fails as a whole
    pub fn publish(&self, index: &RepositoryIndex) -> PublishReport {
        let settings = self.repo.settings();
        let layout = self.repo.layout();

        let tree = index.repo_tree(layout);
        let landing_page = layout.landing_page();
        let log_dir = layout.logs_dir();
        let request = SyncRequest {
            build_id: &index.build_id,
            tree: &tree,
            landing_page: &landing_page,
            timeout: settings.timeouts.mirror(),
            log_dir: Some(&log_dir),
        };
        let policy = RetryPolicy::new(
            settings.publish.retries,
            Duration::from_millis(settings.publish.retry_delay_ms),
        );

        publish::publish(self.mirrors, &request, policy)
    }

    /// Run one cycle under the repository cycle lock
    pub fn run_cycle(&self, options: CycleOptions) -> OrchestratorResult<CycleReport> {
        let start = Instant::now();
        let _lock = self.cycle_lock()?;

        let state_path = self.repo.layout().cycle_state();
        let mut cycle = CycleStateData::new(Ulid::new().to_string());
        cycle.write_to_file(&state_path)?;
        info!(cycle_id = %cycle.cycle_id, ?options, "cycle started");

        let bootstrap = match self.bootstrap_locked() {
            Ok(bootstrap) => bootstrap,
            Err(e) => {
                error!(cycle_id = %cycle.cycle_id, error = %e, "bootstrap failed, cycle halted");
                cycle.record_error(e.to_string());
                cycle.write_to_file(&state_path)?;
                return Err(e);
            }
        };
        let fingerprint = bootstrap.identity.fingerprint;
        cycle.identity_ready()?;
        cycle.write_to_file(&state_path)?;

        let index = match self.build_index(&bootstrap.identity, options.force) {
            Ok(outcome) => {
                cycle.index_ready(outcome.index().build_id.clone(), outcome.rebuilt())?;
                cycle.write_to_file(&state_path)?;
                outcome.into_index()
            }
            Err(OrchestratorError::Build(e)) => {
                cycle.build_failed(e.to_string())?;
                cycle.write_to_file(&state_path)?;
                let prior = index::load_current(self.repo.layout())?;
                return Ok(CycleReport::from_cycle(
                    &cycle,
                    &fingerprint,
                    prior.as_ref(),
                    elapsed_ms(start),
                ));
            }
            Err(e) => {
                cycle.record_error(e.to_string());
                cycle.write_to_file(&state_path)?;
                return Err(e);
            }
        };

        if options.publish {
            let report = self.publish(&index);
            if report.is_degraded() {
                let failed: Vec<&str> = report.failed().map(|o| o.mirror.as_str()).collect();
                warn!(build_id = %index.build_id, failed = ?failed, "publish degraded");
            } else {
                info!(build_id = %index.build_id, mirrors = report.outcomes.len(), "published");
            }
            cycle.settle(report.outcomes)?;
            cycle.write_to_file(&state_path)?;
        }

        Ok(CycleReport::from_cycle(
            &cycle,
            &fingerprint,
            Some(&index),
            elapsed_ms(start),
        ))
    }

    fn cycle_lock(&self) -> Result<RepoLock, LockError> {
        RepoLock::acquire(
            &self.repo.layout().locks_dir(),
            "cycle",
            self.repo.cycle_lock_timeout(),
        )
    }
}

fn discard_build(dir: &Path) {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(dir = %dir.display(), error = %e, "could not remove failed build"),
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EffectiveConfig;
    use crate::mock::{MockIndexBuilder, MockKeyGenerator, MockMirror};
    use crate::state::CycleState;
    use serde_json::json;
    use tempfile::TempDir;

    fn repo(dir: &Path) -> Repository {
        let settings = EffectiveConfig::build(
            None,
            None,
            Some(json!({
                "repo_dir": dir.join("repo"),
                "publish": {"retries": 0, "retry_delay_ms": 0},
            })),
        )
        .unwrap()
        .settings()
        .unwrap();
        Repository::open(settings).unwrap()
    }

    fn apk(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_bootstrap_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let repo = repo(dir.path());
        let keys = MockKeyGenerator::new();
        let builder = MockIndexBuilder::new();
        let orchestrator = Orchestrator::new(&repo, &keys, &builder, &[]);

        let first = orchestrator.bootstrap().unwrap();
        assert!(first.identity.created);
        assert!(first.config_written);
        assert!(first.landing_written);

        let second = orchestrator.bootstrap().unwrap();
        assert!(!second.identity.created);
        assert!(!second.config_written);
        assert!(!second.landing_written);
        assert_eq!(first.identity.fingerprint, second.identity.fingerprint);
        assert_eq!(keys.generate_calls(), 1);
    }

    #[test]
    fn test_build_skipped_when_inputs_unchanged() {
        let dir = TempDir::new().unwrap();
        let repo = repo(dir.path());
        repo.add_artifact(&apk(dir.path(), "org.a_1.apk", "a")).unwrap();

        let keys = MockKeyGenerator::new();
        let builder = MockIndexBuilder::new();
        let orchestrator = Orchestrator::new(&repo, &keys, &builder, &[]);
        let identity = orchestrator.bootstrap().unwrap().identity;

        let first = orchestrator.build_index(&identity, false).unwrap();
        assert!(first.rebuilt());
        assert_eq!(first.index().version, 1);
        // Default metadata was adopted, and that does not trigger a rebuild
        assert!(repo.metadata().has_record("org.a"));

        let second = orchestrator.build_index(&identity, false).unwrap();
        assert!(!second.rebuilt());
        assert_eq!(builder.build_calls(), 1);

        let forced = orchestrator.build_index(&identity, true).unwrap();
        assert!(forced.rebuilt());
        assert_eq!(forced.index().version, 2);
    }

    #[test]
    fn test_failed_build_keeps_current_and_discards_workspace() {
        let dir = TempDir::new().unwrap();
        let repo = repo(dir.path());
        let keys = MockKeyGenerator::new();
        let builder = MockIndexBuilder::new();
        let orchestrator = Orchestrator::new(&repo, &keys, &builder, &[]);
        let identity = orchestrator.bootstrap().unwrap().identity;

        let good = orchestrator.build_index(&identity, false).unwrap().into_index();

        repo.add_artifact(&apk(dir.path(), "org.bad_1.apk", "CORRUPT")).unwrap();
        let err = orchestrator.build_index(&identity, false).unwrap_err();
        assert!(matches!(err, OrchestratorError::Build(_)));
        assert_eq!(err.exit_code(), ExitCode::IndexBuild);

        assert_eq!(repo.current_index().unwrap(), Some(good.clone()));
        let builds: Vec<_> = fs::read_dir(repo.layout().builds_dir()).unwrap().collect();
        assert_eq!(builds.len(), 1);
    }

    #[test]
    fn test_cycle_states_recorded() {
        let dir = TempDir::new().unwrap();
        let repo = repo(dir.path());
        let keys = MockKeyGenerator::new();
        let builder = MockIndexBuilder::new();
        let mirror = MockMirror::new("bucket");
        let mirrors: Vec<Box<dyn Mirror>> = vec![Box::new(mirror.clone())];
        let orchestrator = Orchestrator::new(&repo, &keys, &builder, &mirrors);

        let report = orchestrator
            .run_cycle(CycleOptions {
                force: false,
                publish: true,
            })
            .unwrap();
        assert_eq!(report.state, CycleState::Published);
        assert!(report.rebuilt);
        assert!(mirror.contains("index-v1.jar"));

        let last = repo.last_cycle().unwrap().unwrap();
        assert_eq!(last.cycle_id, report.cycle_id);
        assert_eq!(last.state, CycleState::Published);
    }

    #[test]
    fn test_identity_failure_halts_cycle() {
        let dir = TempDir::new().unwrap();
        let repo = repo(dir.path());
        let keys = MockKeyGenerator::failing("no entropy");
        let builder = MockIndexBuilder::new();
        let orchestrator = Orchestrator::new(&repo, &keys, &builder, &[]);

        let err = orchestrator.run_cycle(CycleOptions::default()).unwrap_err();
        assert_eq!(err.exit_code(), ExitCode::IdentityCreation);
        assert_eq!(builder.build_calls(), 0);

        let last = repo.last_cycle().unwrap().unwrap();
        assert_eq!(last.state, CycleState::Uninitialized);
        assert!(last.error.unwrap().contains("no entropy"));
    }

    #[test]
    fn test_fingerprint_never_creates() {
        let dir = TempDir::new().unwrap();
        let repo = repo(dir.path());

        let err = repo.fingerprint().unwrap_err();
        assert_eq!(err.exit_code(), ExitCode::IdentityAbsent);
        assert!(!repo.layout().identity_dir().join("keystore.p12").exists());
    }
}
