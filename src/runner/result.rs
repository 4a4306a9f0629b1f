use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::driver::Artifact;
use crate::matrix::UnitKey;

/// Terminal outcome of one RunUnit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    Passed,
    Failed,
    TimedOut,
    Skipped,
}

impl Outcome {
    /// Whether this outcome consumes retry budget and fails a verdict.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::TimedOut => write!(f, "timedOut"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Result of executing a single RunUnit attempt.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub key: UnitKey,
    pub attempt: u32,
    pub worker: usize,
    pub outcome: Outcome,
    pub duration: Duration,
    /// Artifacts in the order the driver reported them.
    pub artifacts: Vec<Artifact>,
    pub error: Option<TestError>,
    /// Teardown failures. Never change `outcome`.
    pub secondary_errors: Vec<TestError>,
    /// Whether the scheduler re-enqueued another attempt after this one.
    pub will_retry: bool,
}

impl RunResult {
    pub fn passed(key: UnitKey, attempt: u32, duration: Duration) -> Self {
        Self::with_outcome(key, attempt, Outcome::Passed, duration, None)
    }

    pub fn failed(key: UnitKey, attempt: u32, duration: Duration, error: TestError) -> Self {
        let outcome = if error.kind == TestErrorKind::Timeout {
            Outcome::TimedOut
        } else {
            Outcome::Failed
        };
        Self::with_outcome(key, attempt, outcome, duration, Some(error))
    }

    /// A skipped result with zero duration.
    pub fn skipped(key: UnitKey, attempt: u32) -> Self {
        Self::with_outcome(key, attempt, Outcome::Skipped, Duration::ZERO, None)
    }

    fn with_outcome(
        key: UnitKey,
        attempt: u32,
        outcome: Outcome,
        duration: Duration,
        error: Option<TestError>,
    ) -> Self {
        Self {
            key,
            attempt,
            worker: 0,
            outcome,
            duration,
            artifacts: Vec::new(),
            error,
            secondary_errors: Vec::new(),
            will_retry: false,
        }
    }
}

/// Error raised by a test body, fixture hook or driver call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TestError {
    pub kind: TestErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl TestError {
    pub fn new(kind: TestErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    /// Shorthand for an assertion failure.
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::new(TestErrorKind::AssertionFailed, message)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_detail_opt(mut self, detail: Option<String>) -> Self {
        self.detail = detail;
        self
    }
}

/// Classification of test errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestErrorKind {
    /// An expectation in the test body did not hold.
    AssertionFailed,
    /// A fixture setup hook failed.
    SetupFailed,
    /// A fixture teardown hook failed.
    TeardownFailed,
    /// The driver could not perform an action.
    DriverError,
    /// The unit exceeded its timeout.
    Timeout,
    /// A panic escaped the test body or a fixture hook.
    WorkerCrash,
}

impl fmt::Display for TestErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AssertionFailed => write!(f, "assertion failed"),
            Self::SetupFailed => write!(f, "setup failed"),
            Self::TeardownFailed => write!(f, "teardown failed"),
            Self::DriverError => write!(f, "driver error"),
            Self::Timeout => write!(f, "timeout"),
            Self::WorkerCrash => write!(f, "worker crash"),
        }
    }
}
