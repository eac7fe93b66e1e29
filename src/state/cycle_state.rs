//! Cycle state record (state/cycle_state.json)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

use super::{next_seq, now_rfc3339};
use crate::publish::MirrorOutcome;

/// Schema version for cycle_state.json
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "fdroid-repo/cycle_state@1";

/// Cycle state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleState {
    /// Nothing established yet in this cycle
    Uninitialized,
    /// A signing identity exists and is loaded
    IdentityReady,
    /// A signed index is authoritative (fresh or unchanged)
    IndexReady,
    /// Every mirror reflects the index
    Published,
    /// At least one mirror failed
    Degraded,
}

impl CycleState {
    /// Check if transition from this state to target is valid
    pub fn can_transition_to(&self, target: CycleState) -> bool {
        use CycleState::*;
        matches!(
            (self, target),
            (Uninitialized, IdentityReady)
                | (IdentityReady, IdentityReady)
                | (IdentityReady, IndexReady)
                | (IndexReady, Published)
                | (IndexReady, Degraded)
        )
    }

    /// Cycle reached a publish outcome
    pub fn is_settled(&self) -> bool {
        matches!(self, CycleState::Published | CycleState::Degraded)
    }
}

/// Cycle state artifact data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleStateData {
    pub schema_version: u32,

    pub schema_id: String,

    pub cycle_id: String,

    pub state: CycleState,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Monotonic sequence counter for ordering
    pub seq: u64,

    /// Index this cycle published (new or unchanged)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,

    /// Whether the index builder ran in this cycle
    pub rebuilt: bool,

    /// Last failure recorded in this cycle
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Per-mirror results, filled when publishing
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mirrors: Vec<MirrorOutcome>,
}

/// Errors for cycle state operations
#[derive(Debug, thiserror::Error)]
pub enum CycleStateError {
    #[error("Invalid cycle transition from {from:?} to {to:?}")]
    InvalidTransition { from: CycleState, to: CycleState },

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl CycleStateData {
    /// Create a new cycle in UNINITIALIZED state
    pub fn new(cycle_id: String) -> Self {
        let now = now_rfc3339();
        Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            cycle_id,
            state: CycleState::Uninitialized,
            created_at: now,
            updated_at: now,
            seq: next_seq(),
            build_id: None,
            rebuilt: false,
            error: None,
            mirrors: Vec::new(),
        }
    }

    /// Transition to a new state
    pub fn transition(&mut self, new_state: CycleState) -> Result<(), CycleStateError> {
        if !self.state.can_transition_to(new_state) {
            return Err(CycleStateError::InvalidTransition {
                from: self.state,
                to: new_state,
            });
        }

        self.state = new_state;
        self.updated_at = now_rfc3339();
        self.seq = next_seq();
        Ok(())
    }

    pub fn identity_ready(&mut self) -> Result<(), CycleStateError> {
        self.transition(CycleState::IdentityReady)
    }

    /// Record a failed build; the cycle stays at IDENTITY_READY
    pub fn build_failed(&mut self, error: impl Into<String>) -> Result<(), CycleStateError> {
        self.transition(CycleState::IdentityReady)?;
        self.error = Some(error.into());
        Ok(())
    }

    pub fn index_ready(&mut self, build_id: String, rebuilt: bool) -> Result<(), CycleStateError> {
        self.transition(CycleState::IndexReady)?;
        self.build_id = Some(build_id);
        self.rebuilt = rebuilt;
        self.error = None;
        Ok(())
    }

    /// Settle the cycle from per-mirror results
    pub fn settle(&mut self, mirrors: Vec<MirrorOutcome>) -> Result<(), CycleStateError> {
        let target = if mirrors.iter().all(|m| m.ok) {
            CycleState::Published
        } else {
            CycleState::Degraded
        };
        self.transition(target)?;
        self.mirrors = mirrors;
        Ok(())
    }

    /// Record a failure that does not change state (identity creation)
    pub fn record_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.updated_at = now_rfc3339();
        self.seq = next_seq();
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Write atomically to file (write-then-rename)
    pub fn write_to_file(&self, path: &Path) -> Result<(), CycleStateError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = self.to_json()?;

        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &json)?;
        fs::rename(&temp_path, path)?;

        Ok(())
    }

    pub fn from_file(path: &Path) -> Result<Self, CycleStateError> {
        let json = fs::read_to_string(path)?;
        Ok(Self::from_json(&json)?)
    }

    /// Load the previous record, if any
    pub fn load_last(path: &Path) -> Result<Option<Self>, CycleStateError> {
        match fs::read_to_string(path) {
            Ok(json) => Ok(Some(Self::from_json(&json)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
