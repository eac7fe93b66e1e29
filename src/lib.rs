//! F-Droid repository orchestrator
//!
//! Bootstraps a repository signing identity, builds a signed index over an
//! APK store through an external index builder, and publishes the result to
//! one or more mirrors (a local HTTP root, object-store buckets). Each cycle
//! runs through an explicit state machine so failures leave the last good
//! index in place.

pub mod builder;
pub mod config;
pub mod identity;
pub mod index;
pub mod landing;
pub mod layout;
pub mod lock;
pub mod mirror;
pub mod mock;
pub mod orchestrator;
pub mod process;
pub mod publish;
pub mod serve;
pub mod state;
pub mod store;
pub mod summary;
pub mod timeout;

pub use config::{EffectiveConfig, Settings};
pub use orchestrator::{
    BootstrapReport, BuildOutcome, CycleOptions, Orchestrator, OrchestratorError, Repository,
};
pub use summary::{CycleReport, ExitCode};
