//! Failure taxonomy and stable exit codes

use serde::{Deserialize, Serialize};

/// Cycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Every requested step succeeded
    Success,
    /// A step failed; previously served content is untouched
    Failed,
    /// Published, but at least one mirror failed
    Degraded,
}

impl Status {
    pub fn is_failure(&self) -> bool {
        !matches!(self, Status::Success)
    }
}

/// Failure kind - categorizes the cause of failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Configuration could not be loaded or validated
    Config,
    /// Artifact/metadata store operation rejected or failed
    Store,
    /// Signing identity could not be created or loaded (fatal)
    IdentityCreation,
    /// Index build failed; the prior index stays authoritative
    IndexBuild,
    /// One or more mirrors failed to sync
    MirrorSync,
    /// No signing identity exists yet
    IdentityAbsent,
}

impl FailureKind {
    /// Get the stable exit code for this failure kind
    pub fn exit_code(&self) -> ExitCode {
        match self {
            FailureKind::Config => ExitCode::Config,
            FailureKind::Store => ExitCode::Store,
            FailureKind::IdentityCreation => ExitCode::IdentityCreation,
            FailureKind::IndexBuild => ExitCode::IndexBuild,
            FailureKind::MirrorSync => ExitCode::Degraded,
            FailureKind::IdentityAbsent => ExitCode::IdentityAbsent,
        }
    }

    /// Human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            FailureKind::Config => "Configuration error",
            FailureKind::Store => "Store operation failed",
            FailureKind::IdentityCreation => "Signing identity creation failed",
            FailureKind::IndexBuild => "Index build failed",
            FailureKind::MirrorSync => "Mirror sync failed",
            FailureKind::IdentityAbsent => "No signing identity",
        }
    }
}

/// Stable process exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum ExitCode {
    #[default]
    Success = 0,
    /// Unexpected I/O or state error
    Internal = 1,
    Config = 2,
    /// Store or usage error (missing source, not an APK, lock contention)
    Store = 3,
    IdentityCreation = 10,
    IndexBuild = 20,
    /// Publish reached some mirrors but not all
    Degraded = 30,
    IdentityAbsent = 40,
}

impl ExitCode {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(ExitCode::Success),
            1 => Some(ExitCode::Internal),
            2 => Some(ExitCode::Config),
            3 => Some(ExitCode::Store),
            10 => Some(ExitCode::IdentityCreation),
            20 => Some(ExitCode::IndexBuild),
            30 => Some(ExitCode::Degraded),
            40 => Some(ExitCode::IdentityAbsent),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitCode::Success)
    }
}
