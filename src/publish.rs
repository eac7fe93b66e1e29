//! Publish fan-out
//!
//! Every mirror is synced on its own thread and all of them are joined; one
//! mirror failing never stops or rolls back another. Each mirror is retried
//! wholesale a bounded number of times before its failure is recorded.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use tracing::{info, warn};

use crate::mirror::{Mirror, SyncReport, SyncRequest};

/// Result of publishing to one mirror
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorOutcome {
    pub mirror: String,
    pub ok: bool,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SyncReport>,
}

/// Results for every mirror of one publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReport {
    pub build_id: String,
    pub outcomes: Vec<MirrorOutcome>,
}

impl PublishReport {
    /// At least one mirror failed
    pub fn is_degraded(&self) -> bool {
        self.outcomes.iter().any(|o| !o.ok)
    }

    pub fn failed(&self) -> impl Iterator<Item = &MirrorOutcome> {
        self.outcomes.iter().filter(|o| !o.ok)
    }
}

/// Retry policy for mirror syncs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, delay: Duration) -> Self {
        Self { retries, delay }
    }
}

/// Sync `request` to every mirror concurrently and collect all outcomes.
///
/// Outcomes are in the order of `mirrors`.
pub fn publish(
    mirrors: &[Box<dyn Mirror>],
    request: &SyncRequest<'_>,
    policy: RetryPolicy,
) -> PublishReport {
    let outcomes = std::thread::scope(|scope| {
        let handles: Vec<_> = mirrors
            .iter()
            .map(|mirror| {
                let handle = scope.spawn(move || sync_with_retries(mirror.as_ref(), request, policy));
                (mirror.name().to_string(), handle)
            })
            .collect();

        handles
            .into_iter()
            .map(|(name, handle)| {
                handle.join().unwrap_or_else(|_| MirrorOutcome {
                    mirror: name,
                    ok: false,
                    attempts: 0,
                    error: Some("mirror sync panicked".to_string()),
                    report: None,
                })
            })
            .collect()
    });

    PublishReport {
        build_id: request.build_id.to_string(),
        outcomes,
    }
}

fn sync_with_retries(
    mirror: &dyn Mirror,
    request: &SyncRequest<'_>,
    policy: RetryPolicy,
) -> MirrorOutcome {
    let max_attempts = policy.retries + 1;
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        match mirror.sync(request) {
            Ok(report) => {
                info!(
                    mirror = %mirror.name(),
                    build_id = %request.build_id,
                    attempt,
                    files = report.files,
                    "mirror published"
                );
                return MirrorOutcome {
                    mirror: mirror.name().to_string(),
                    ok: true,
                    attempts: attempt,
                    error: None,
                    report: Some(report),
                };
            }
            Err(e) => {
                warn!(
                    mirror = %mirror.name(),
                    build_id = %request.build_id,
                    attempt,
                    max_attempts,
                    error = %e,
                    "mirror sync failed"
                );
                last_error = e.to_string();
                if attempt < max_attempts && !policy.delay.is_zero() {
                    std::thread::sleep(policy.delay);
                }
            }
        }
    }

    MirrorOutcome {
        mirror: mirror.name().to_string(),
        ok: false,
        attempts: max_attempts,
        error: Some(last_error),
        report: None,
    }
}
