//! Publish cycle state machine
//!
//! UNINITIALIZED → IDENTITY_READY → INDEX_READY → {PUBLISHED | DEGRADED}
//!
//! A failed index build loops back to IDENTITY_READY. DEGRADED is not
//! terminal across cycles: the next cycle starts over and may publish.

mod cycle_state;

pub use cycle_state::{CycleState, CycleStateData, CycleStateError, SCHEMA_ID, SCHEMA_VERSION};

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global sequence counter for ordering records within a single process
static SEQUENCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Get the next sequence number for ordering
pub fn next_seq() -> u64 {
    SEQUENCE_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Get current UTC timestamp
pub fn now_rfc3339() -> DateTime<Utc> {
    Utc::now()
}
