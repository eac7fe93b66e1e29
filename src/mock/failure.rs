//! Failure injection for mock collaborators

use std::collections::HashMap;
use std::time::Duration;

/// Operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    Generate,
    ExportCertificate,
    Build,
    Sync,
}

/// Failure configuration for an operation
#[derive(Debug, Clone)]
pub struct FailureConfig {
    /// Error message to return (if any)
    pub message: Option<String>,
    /// Delay to add before responding
    pub delay: Option<Duration>,
    /// Number of times to fail before succeeding (None = always fail)
    pub fail_count: Option<u32>,
}

impl FailureConfig {
    /// Create a config that returns an error
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            delay: None,
            fail_count: None,
        }
    }

    /// Create a config that just adds delay
    pub fn delay(duration: Duration) -> Self {
        Self {
            message: None,
            delay: Some(duration),
            fail_count: None,
        }
    }

    /// Set the number of times to fail before succeeding
    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = Some(count);
        self
    }
}

/// Failure injector shared by the mocks
#[derive(Debug, Default)]
pub struct FailureInjector {
    configs: HashMap<MockOperation, FailureConfig>,
    call_counts: HashMap<MockOperation, u32>,
}

impl FailureInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a failure for an operation
    pub fn inject(&mut self, op: MockOperation, config: FailureConfig) {
        self.configs.insert(op, config);
        self.call_counts.insert(op, 0);
    }

    pub fn inject_error(&mut self, op: MockOperation, message: impl Into<String>) {
        self.inject(op, FailureConfig::error(message));
    }

    pub fn clear(&mut self) {
        self.configs.clear();
        self.call_counts.clear();
    }

    pub fn clear_op(&mut self, op: MockOperation) {
        self.configs.remove(&op);
        self.call_counts.remove(&op);
    }

    /// Count a call and return the error to report, if any.
    ///
    /// Any configured delay is returned alongside and applied by the caller
    /// outside of its lock.
    pub fn check(&mut self, op: MockOperation) -> (Option<Duration>, Option<String>) {
        let Some(config) = self.configs.get(&op) else {
            return (None, None);
        };
        let count = self.call_counts.entry(op).or_insert(0);
        *count += 1;

        if let Some(fail_limit) = config.fail_count {
            if *count > fail_limit {
                return (config.delay, None);
            }
        }
        (config.delay, config.message.clone())
    }
}
