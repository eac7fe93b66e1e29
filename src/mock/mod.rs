//! In-process mock collaborators
//!
//! Stand-ins for the external tools so the orchestrator can be exercised
//! without a JDK, fdroidserver or cloud credentials:
//!
//! - `MockKeyGenerator`: ed25519 key pair in a small JSON keystore, with a
//!   certificate block carrying the public key
//! - `MockIndexBuilder`: signs a JSON index with that key, writes per-package
//!   detail pages and default metadata
//! - `MockMirror`: in-memory bucket with reachability and failure injection
//!
//! All three take failures from a shared `FailureInjector`.

mod builder;
mod failure;
mod keygen;
mod mirror;

pub use builder::{verify_signed_index, MockIndexBuilder, SignedIndex, MOCK_SIGNED_INDEX};
pub use failure::{FailureConfig, FailureInjector, MockOperation};
pub use keygen::MockKeyGenerator;
pub use mirror::MockMirror;
