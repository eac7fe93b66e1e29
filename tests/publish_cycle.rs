//! Build and publish cycles against mock collaborators and a real local mirror

mod common;

use std::fs;

use common::Fixture;
use fdroid_repo::mirror::Mirror;
use fdroid_repo::mock::{verify_signed_index, MockMirror, SignedIndex};
use fdroid_repo::state::CycleState;
use fdroid_repo::summary::{FailureKind, Status};
use fdroid_repo::{CycleOptions, CycleReport, ExitCode, Orchestrator};

const UPDATE: CycleOptions = CycleOptions {
    force: false,
    publish: false,
};

const PUBLISH: CycleOptions = CycleOptions {
    force: false,
    publish: true,
};

fn verified_index(fx: &Fixture) -> SignedIndex {
    let index = fx.repo.current_index().unwrap().unwrap();
    let pem = fs::read_to_string(fx.repo.layout().identity_dir().join("repo-cert.pem")).unwrap();
    verify_signed_index(&index.signed_payload_path(fx.repo.layout()), &pem).unwrap()
}

fn cycle(fx: &Fixture, mirrors: &[Box<dyn Mirror>], options: CycleOptions) -> CycleReport {
    Orchestrator::new(&fx.repo, &fx.keys, &fx.builder, mirrors)
        .run_cycle(options)
        .unwrap()
}

#[test]
fn test_empty_store_builds_signed_index() {
    let fx = Fixture::new();

    let report = cycle(&fx, &[], UPDATE);
    assert_eq!(report.state, CycleState::IndexReady);
    assert!(report.rebuilt);
    assert_eq!(report.artifact_count, Some(0));
    assert_eq!(report.index_version, Some(1));

    assert_eq!(verified_index(&fx).artifact_count(), 0);
}

#[test]
fn test_index_signature_verifies_for_artifacts() {
    let fx = Fixture::new();
    for name in ["org.example.notes_3.apk", "org.example.clock_12.apk", "chat.apk"] {
        fx.repo.add_artifact(&fx.apk(name, name)).unwrap();
    }

    let report = cycle(&fx, &[], UPDATE);
    assert_eq!(report.artifact_count, Some(3));
    assert_eq!(
        verified_index(&fx).package_ids(),
        vec!["chat", "org.example.clock", "org.example.notes"]
    );
}

#[test]
fn test_unchanged_inputs_do_not_rebuild() {
    let fx = Fixture::new();
    fx.repo.add_artifact(&fx.apk("org.a_1.apk", "a")).unwrap();

    let first = cycle(&fx, &[], UPDATE);
    let second = cycle(&fx, &[], UPDATE);

    assert!(first.rebuilt);
    assert!(!second.rebuilt);
    assert_eq!(first.build_id, second.build_id);
    assert_eq!(fx.builder.build_calls(), 1);
    assert!(second.human_summary.starts_with("Unchanged"));
}

#[test]
fn test_remove_then_publish_prunes_every_mirror() {
    let fx = Fixture::new();
    let bucket = MockMirror::new("bucket");
    let mut mirrors = fx.configured_mirrors();
    mirrors.push(Box::new(bucket.clone()));

    fx.repo.add_artifact(&fx.apk("org.a_1.apk", "a")).unwrap();
    fx.repo.add_artifact(&fx.apk("org.b_1.apk", "b")).unwrap();
    let report = cycle(&fx, &mirrors, PUBLISH);
    assert_eq!(report.state, CycleState::Published);
    assert!(bucket.contains("org.a_1.apk"));
    assert!(fx.www().join("repo/org.a_1.apk").is_file());

    let removed = fx.repo.remove_package("org.a").unwrap();
    assert!(!removed.is_empty());
    // Idempotent
    assert!(fx.repo.remove_package("org.a").unwrap().is_empty());

    let report = cycle(&fx, &mirrors, PUBLISH);
    assert_eq!(report.state, CycleState::Published);
    assert!(report.rebuilt);
    assert_eq!(verified_index(&fx).package_ids(), vec!["org.b"]);

    assert!(!bucket.contains("org.a_1.apk"));
    assert!(!bucket.contains("org.a/index.html"));
    assert!(bucket.contains("org.b_1.apk"));
    assert!(!fx.www().join("repo/org.a_1.apk").exists());
    assert!(fx.www().join("repo/org.b_1.apk").is_file());
    assert!(!fx.repo.metadata().has_record("org.a"));
}

#[test]
fn test_release_named_artifacts_publish_and_remove() {
    let fx = Fixture::new();
    let mirrors = fx.configured_mirrors();

    fx.repo.add_artifact(&fx.apk("app-release.apk", "r")).unwrap();
    fx.repo.add_artifact(&fx.apk("org.b_3.APK", "b")).unwrap();
    let report = cycle(&fx, &mirrors, PUBLISH);
    assert_eq!(report.state, CycleState::Published);
    assert_eq!(report.artifact_count, Some(2));
    assert_eq!(verified_index(&fx).package_ids(), vec!["app-release", "org.b"]);
    assert!(fx.www().join("repo/org.b_3.APK").is_file());

    let removed = fx.repo.remove_package("org.b").unwrap();
    assert!(removed.iter().any(|p| p.ends_with("org.b_3.APK")));
    let report = cycle(&fx, &mirrors, PUBLISH);
    assert_eq!(report.state, CycleState::Published);
    assert_eq!(verified_index(&fx).package_ids(), vec!["app-release"]);
    assert!(!fx.www().join("repo/org.b_3.APK").exists());
}

#[test]
fn test_unreachable_mirror_degrades_but_other_is_updated() {
    let fx = Fixture::new();
    let bucket = MockMirror::new("bucket").unreachable();
    let mut mirrors = fx.configured_mirrors();
    mirrors.push(Box::new(bucket.clone()));

    fx.repo.add_artifact(&fx.apk("org.a_1.apk", "a")).unwrap();
    let report = cycle(&fx, &mirrors, PUBLISH);

    assert_eq!(report.state, CycleState::Degraded);
    assert_eq!(report.status, Status::Degraded);
    assert_eq!(report.failure_kind, Some(FailureKind::MirrorSync));
    assert_eq!(report.exit_code(), ExitCode::Degraded);
    assert!(fx.www().join("repo/index-v1.jar").is_file());
    assert!(fx.www().join("index.html").is_file());

    let failed: Vec<_> = report.mirrors.iter().filter(|m| !m.ok).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].mirror, "bucket");
    // One retry configured
    assert_eq!(failed[0].attempts, 2);

    // Next cycle recovers once the mirror is back, without a rebuild
    bucket.set_reachable(true);
    let report = cycle(&fx, &mirrors, PUBLISH);
    assert_eq!(report.state, CycleState::Published);
    assert!(!report.rebuilt);
    assert!(bucket.contains("index-v1.jar"));
    assert!(bucket.landing().is_some());
}

#[test]
fn test_build_failure_keeps_last_good_index_served() {
    let fx = Fixture::new();
    let bucket = MockMirror::new("bucket");
    let mut mirrors = fx.configured_mirrors();
    mirrors.push(Box::new(bucket.clone()));

    fx.repo.add_artifact(&fx.apk("org.a_1.apk", "a")).unwrap();
    let good = cycle(&fx, &mirrors, PUBLISH);
    let served = fs::read(fx.www().join("repo/index-v1.jar")).unwrap();

    fx.repo
        .add_artifact(&fx.apk("org.broken_1.apk", "CORRUPT apk"))
        .unwrap();
    let report = cycle(&fx, &mirrors, PUBLISH);

    assert_eq!(report.state, CycleState::IdentityReady);
    assert_eq!(report.exit_code(), ExitCode::IndexBuild);
    assert!(report.error.as_deref().unwrap().contains("malformed artifact"));
    assert_eq!(report.build_id, good.build_id);

    assert_eq!(fx.repo.current_index().unwrap().unwrap().build_id, good.build_id.clone().unwrap());
    assert_eq!(fs::read(fx.www().join("repo/index-v1.jar")).unwrap(), served);
    assert_eq!(bucket.last_build(), good.build_id);
    assert_eq!(bucket.sync_count(), 1);

    // Fixing the store lets the next cycle publish again
    fx.repo.remove_package("org.broken").unwrap();
    let report = cycle(&fx, &mirrors, PUBLISH);
    assert_eq!(report.state, CycleState::Published);
}

#[test]
fn test_retention_prunes_old_builds() {
    let fx = Fixture::new();
    for version in 1..=5 {
        fx.repo
            .add_artifact(&fx.apk(&format!("org.a_{}.apk", version), "a"))
            .unwrap();
        cycle(&fx, &[], UPDATE);
    }

    let builds = fs::read_dir(fx.repo.layout().builds_dir()).unwrap().count();
    assert_eq!(builds, fx.repo.settings().retention.keep_builds);
    assert_eq!(fx.repo.current_index().unwrap().unwrap().version, 5);
}
