//! Cycle report printed at the end of `update` and `publish`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::failure::{ExitCode, FailureKind, Status};
use crate::identity::Fingerprint;
use crate::index::RepositoryIndex;
use crate::publish::MirrorOutcome;
use crate::state::{CycleState, CycleStateData};

/// Schema version for cycle reports
pub const CYCLE_REPORT_SCHEMA_VERSION: u32 = 1;

/// Schema identifier for cycle reports
pub const CYCLE_REPORT_SCHEMA_ID: &str = "fdroid-repo/cycle_report@1";

/// Outcome of one bootstrap/build/publish cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub schema_version: u32,

    pub schema_id: String,

    pub cycle_id: String,

    pub created_at: DateTime<Utc>,

    /// State the cycle ended in
    pub state: CycleState,

    pub status: Status,

    pub exit_code: i32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,

    /// Certificate fingerprint, colon-separated hex
    pub fingerprint: String,

    /// Authoritative index after the cycle
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_version: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_count: Option<usize>,

    /// Whether the index builder ran
    pub rebuilt: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mirrors: Vec<MirrorOutcome>,

    pub duration_ms: u64,

    pub human_summary: String,
}

impl CycleReport {
    /// Summarize a finished cycle.
    ///
    /// `index` is whatever index is authoritative once the cycle ends, which
    /// after a failed build is the previous one.
    pub fn from_cycle(
        cycle: &CycleStateData,
        fingerprint: &Fingerprint,
        index: Option<&RepositoryIndex>,
        duration_ms: u64,
    ) -> Self {
        let failure_kind = match cycle.state {
            CycleState::Degraded => Some(FailureKind::MirrorSync),
            CycleState::IdentityReady if cycle.error.is_some() => Some(FailureKind::IndexBuild),
            _ => None,
        };
        let status = match failure_kind {
            Some(FailureKind::MirrorSync) => Status::Degraded,
            Some(_) => Status::Failed,
            None => Status::Success,
        };
        let exit_code = failure_kind
            .map(|kind| kind.exit_code())
            .unwrap_or(ExitCode::Success);

        let human_summary = Self::generate_human_summary(cycle, index);

        Self {
            schema_version: CYCLE_REPORT_SCHEMA_VERSION,
            schema_id: CYCLE_REPORT_SCHEMA_ID.to_string(),
            cycle_id: cycle.cycle_id.clone(),
            created_at: Utc::now(),
            state: cycle.state,
            status,
            exit_code: exit_code.as_i32(),
            failure_kind,
            fingerprint: fingerprint.to_colon_hex(),
            build_id: index.map(|i| i.build_id.clone()),
            index_version: index.map(|i| i.version),
            artifact_count: index.map(|i| i.artifact_count),
            rebuilt: cycle.rebuilt,
            error: cycle.error.clone(),
            mirrors: cycle.mirrors.clone(),
            duration_ms,
            human_summary,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from_i32(self.exit_code).unwrap_or(ExitCode::Internal)
    }

    fn generate_human_summary(cycle: &CycleStateData, index: Option<&RepositoryIndex>) -> String {
        let described = index
            .map(|i| format!("index v{} ({} artifacts)", i.version, i.artifact_count))
            .unwrap_or_else(|| "no index".to_string());

        match cycle.state {
            CycleState::Published => format!(
                "Published {} to {} mirror(s)",
                described,
                cycle.mirrors.len()
            ),
            CycleState::Degraded => {
                let failed: Vec<&str> = cycle
                    .mirrors
                    .iter()
                    .filter(|m| !m.ok)
                    .map(|m| m.mirror.as_str())
                    .collect();
                format!(
                    "Degraded: {} reached {}/{} mirror(s); failed: {}",
                    described,
                    cycle.mirrors.len() - failed.len(),
                    cycle.mirrors.len(),
                    failed.join(", ")
                )
            }
            CycleState::IndexReady if cycle.rebuilt => format!("Built {}", described),
            CycleState::IndexReady => format!("Unchanged: {}", described),
            CycleState::IdentityReady => match (&cycle.error, index) {
                (Some(error), Some(_)) => {
                    format!("Index build failed: {}; still serving {}", error, described)
                }
                (Some(error), None) => format!("Index build failed: {}", error),
                (None, _) => "Signing identity ready".to_string(),
            },
            CycleState::Uninitialized => "Cycle did not start".to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
