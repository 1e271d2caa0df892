//! Tracked operation scopes
//!
//! Long-running steps (clones, fetches) are wrapped in a [`TelemetryScope`].
//! A scope is marked successful explicitly and reports its outcome when it
//! is dropped, so an early `?` return is recorded as a failure without any
//! extra bookkeeping at the call site.

use std::time::{Duration, Instant};

use log::debug;

/// Kind of operation being tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedOperation {
    Clone,
    Fetch,
}

impl TrackedOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackedOperation::Clone => "GitClone",
            TrackedOperation::Fetch => "GitFetch",
        }
    }
}

/// Receives finished scopes
pub trait TelemetryRecorder: Send + Sync {
    fn record(&self, operation: TrackedOperation, tag: &str, success: bool, elapsed: Duration);

    /// Start tracking an operation. The returned scope reports back to this
    /// recorder when dropped.
    fn track(&self, operation: TrackedOperation, tag: &str) -> TelemetryScope<'_>
    where
        Self: Sized,
    {
        TelemetryScope::new(self, operation, tag)
    }
}

/// Open scope of a tracked operation
pub struct TelemetryScope<'a> {
    recorder: &'a dyn TelemetryRecorder,
    operation: TrackedOperation,
    tag: String,
    started: Instant,
    success: bool,
}

impl<'a> TelemetryScope<'a> {
    pub fn new(recorder: &'a dyn TelemetryRecorder, operation: TrackedOperation, tag: &str) -> Self {
        debug!("Starting {} ({})", operation.as_str(), tag);
        Self {
            recorder,
            operation,
            tag: tag.to_string(),
            started: Instant::now(),
            success: false,
        }
    }

    pub fn set_success(&mut self) {
        self.success = true;
    }
}

impl Drop for TelemetryScope<'_> {
    fn drop(&mut self) {
        self.recorder
            .record(self.operation, &self.tag, self.success, self.started.elapsed());
    }
}

/// Reports scopes through the `log` facade at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTelemetryRecorder;

impl TelemetryRecorder for LogTelemetryRecorder {
    fn record(&self, operation: TrackedOperation, tag: &str, success: bool, elapsed: Duration) {
        debug!(
            "{} ({}) {} after {:.2?}",
            operation.as_str(),
            tag,
            if success { "succeeded" } else { "failed" },
            elapsed
        );
    }
}
