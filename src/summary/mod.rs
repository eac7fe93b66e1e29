//! Cycle reports and the failure taxonomy behind exit codes

mod cycle_report;
mod failure;

pub use cycle_report::{CycleReport, CYCLE_REPORT_SCHEMA_ID, CYCLE_REPORT_SCHEMA_VERSION};
pub use failure::{ExitCode, FailureKind, Status};
