//! Timeouts for external tool invocations
//!
//! Every subprocess the orchestrator starts (key generation, index build,
//! mirror sync) runs under a wall-clock deadline. Expiry is reported as the
//! failure of the corresponding operation.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Timeout configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Maximum wall-clock time of one index build (default: 1800 = 30 min)
    pub build_seconds: u64,

    /// Maximum wall-clock time of one mirror sync attempt (default: 900)
    pub mirror_seconds: u64,

    /// Maximum wall-clock time of key generation (default: 120)
    pub keygen_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            build_seconds: 1800,
            mirror_seconds: 900,
            keygen_seconds: 120,
        }
    }
}

impl TimeoutConfig {
    /// Validate bounds
    pub fn validate(&self) -> Result<(), TimeoutValidationError> {
        if self.build_seconds == 0 || self.build_seconds > 86400 {
            return Err(TimeoutValidationError::BuildOutOfBounds {
                value: self.build_seconds,
            });
        }

        if self.mirror_seconds == 0 || self.mirror_seconds > 86400 {
            return Err(TimeoutValidationError::MirrorOutOfBounds {
                value: self.mirror_seconds,
            });
        }

        if self.keygen_seconds == 0 || self.keygen_seconds > 3600 {
            return Err(TimeoutValidationError::KeygenOutOfBounds {
                value: self.keygen_seconds,
            });
        }

        Ok(())
    }

    pub fn build(&self) -> Duration {
        Duration::from_secs(self.build_seconds)
    }

    pub fn mirror(&self) -> Duration {
        Duration::from_secs(self.mirror_seconds)
    }

    pub fn keygen(&self) -> Duration {
        Duration::from_secs(self.keygen_seconds)
    }
}

/// Timeout validation errors
#[derive(Debug, thiserror::Error)]
pub enum TimeoutValidationError {
    #[error("build_seconds must be in (0, 86400], got {value}")]
    BuildOutOfBounds { value: u64 },

    #[error("mirror_seconds must be in (0, 86400], got {value}")]
    MirrorOutOfBounds { value: u64 },

    #[error("keygen_seconds must be in (0, 3600], got {value}")]
    KeygenOutOfBounds { value: u64 },
}

/// Wall-clock deadline for a single operation
///
/// The deadline only reports expiry; the caller terminates the work.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    limit: Duration,
}

impl Deadline {
    /// Start a deadline now
    pub fn after(limit: Duration) -> Self {
        Self {
            start: Instant::now(),
            limit,
        }
    }

    /// True once the limit has passed
    pub fn is_expired(&self) -> bool {
        self.start.elapsed() > self.limit
    }

    /// Time since start
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time left before expiry
    pub fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.elapsed())
    }

    /// Configured limit
    pub fn limit(&self) -> Duration {
        self.limit
    }
}
