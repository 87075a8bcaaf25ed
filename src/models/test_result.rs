//! Test result models
//!
//! Defines attempt results, final unit verdicts and run summaries.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Executor label used for in-process local execution
pub const LOCAL_EXECUTOR: &str = "local";

/// Test execution status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pass,
    Fail,
    Skip,
    Error,
}

impl TestStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            TestStatus::Pass => "✓",
            TestStatus::Fail => "✗",
            TestStatus::Skip => "○",
            TestStatus::Error => "!",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TestStatus::Pass)
    }

    /// Fail and Error both count as a failed attempt for retry purposes
    pub fn is_failure(&self) -> bool {
        matches!(self, TestStatus::Fail | TestStatus::Error)
    }

    /// Status token written to event reports
    pub fn event_name(&self) -> &'static str {
        match self {
            TestStatus::Pass => "SUCCESSFUL",
            TestStatus::Fail => "FAILED",
            TestStatus::Skip => "SKIPPED",
            TestStatus::Error => "ERRORED",
        }
    }

    pub fn from_event_name(s: &str) -> Option<Self> {
        match s {
            "SUCCESSFUL" => Some(TestStatus::Pass),
            "FAILED" => Some(TestStatus::Fail),
            "SKIPPED" => Some(TestStatus::Skip),
            "ERRORED" => Some(TestStatus::Error),
            _ => None,
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Pass => write!(f, "PASS"),
            TestStatus::Fail => write!(f, "FAIL"),
            TestStatus::Skip => write!(f, "SKIP"),
            TestStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Result of a single execution attempt of one unit
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttemptResult {
    pub unit_id: String,
    pub attempt: u32,
    pub status: TestStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub executor: String,
}

impl AttemptResult {
    fn new(unit_id: impl Into<String>, status: TestStatus, duration_ms: u64) -> Self {
        Self {
            unit_id: unit_id.into(),
            attempt: 1,
            status,
            duration_ms,
            message: None,
            executor: LOCAL_EXECUTOR.to_string(),
        }
    }

    pub fn pass(unit_id: impl Into<String>, duration_ms: u64) -> Self {
        Self::new(unit_id, TestStatus::Pass, duration_ms)
    }

    pub fn fail(unit_id: impl Into<String>, duration_ms: u64, message: impl Into<String>) -> Self {
        Self::new(unit_id, TestStatus::Fail, duration_ms).with_message(message)
    }

    pub fn skip(unit_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(unit_id, TestStatus::Skip, 0).with_message(reason)
    }

    pub fn error(unit_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(unit_id, TestStatus::Error, 0).with_message(error)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn on_executor(mut self, executor: impl Into<String>) -> Self {
        self.executor = executor.into();
        self
    }
}

impl fmt::Display for AttemptResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (attempt {}, {}) [{}ms]",
            self.status.symbol(),
            self.unit_id,
            self.attempt,
            self.executor,
            self.duration_ms
        )?;
        if let Some(msg) = &self.message {
            write!(f, " - {msg}")?;
        }
        Ok(())
    }
}

/// Final verdict of a unit after all attempts
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnitVerdict {
    pub unit_id: String,
    pub status: TestStatus,
    /// Every attempt in order, including suppressed intermediate failures
    pub attempts: Vec<AttemptResult>,
}

impl UnitVerdict {
    /// Build a verdict from ordered attempts; the last attempt decides
    pub fn from_attempts(unit_id: impl Into<String>, attempts: Vec<AttemptResult>) -> Self {
        let status = attempts
            .last()
            .map(|a| a.status)
            .unwrap_or(TestStatus::Error);
        Self {
            unit_id: unit_id.into(),
            status,
            attempts,
        }
    }

    pub fn retries(&self) -> u32 {
        self.attempts.len().saturating_sub(1) as u32
    }

    /// Passed, but only after at least one failed attempt
    pub fn is_flaky(&self) -> bool {
        self.status.is_success() && self.attempts.iter().any(|a| a.status.is_failure())
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.attempts.iter().map(|a| a.duration_ms).sum()
    }

    pub fn last_message(&self) -> Option<&str> {
        self.attempts.last().and_then(|a| a.message.as_deref())
    }
}

impl fmt::Display for UnitVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.status.symbol(),
            self.unit_id,
            self.total_duration_ms()
        )?;
        if self.retries() > 0 {
            write!(f, " ({} retries)", self.retries())?;
        }
        if let Some(msg) = self.last_message() {
            write!(f, " - {msg}")?;
        }
        Ok(())
    }
}

/// Summary of a complete run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub flaky: usize,
    pub retried: usize,
    pub total_duration_ms: u64,
    pub verdicts: Vec<UnitVerdict>,
}

impl RunSummary {
    pub fn new(verdicts: Vec<UnitVerdict>) -> Self {
        let count = |status: TestStatus| verdicts.iter().filter(|v| v.status == status).count();

        Self {
            total: verdicts.len(),
            passed: count(TestStatus::Pass),
            failed: count(TestStatus::Fail),
            skipped: count(TestStatus::Skip),
            errors: count(TestStatus::Error),
            flaky: verdicts.iter().filter(|v| v.is_flaky()).count(),
            retried: verdicts.iter().filter(|v| v.retries() > 0).count(),
            total_duration_ms: verdicts.iter().map(|v| v.total_duration_ms()).sum(),
            verdicts,
        }
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.passed as f64 / self.total as f64) * 100.0
        }
    }

    pub fn is_successful(&self) -> bool {
        self.failed == 0 && self.errors == 0
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_successful() {
            0
        } else {
            1
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for verdict in &self.verdicts {
            writeln!(f, "  {verdict}")?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Skip: {} | Error: {} | Flaky: {}",
            self.total, self.passed, self.failed, self.skipped, self.errors, self.flaky
        )?;
        writeln!(
            f,
            "Pass Rate: {:.1}% | Duration: {}ms",
            self.pass_rate(),
            self.total_duration_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_event_names() {
        for status in [
            TestStatus::Pass,
            TestStatus::Fail,
            TestStatus::Skip,
            TestStatus::Error,
        ] {
            assert_eq!(TestStatus::from_event_name(status.event_name()), Some(status));
        }
        assert_eq!(TestStatus::from_event_name("ABORTED"), None);
    }

    #[test]
    fn test_flaky_verdict() {
        let verdict = UnitVerdict::from_attempts(
            "B",
            vec![
                AttemptResult::fail("B", 10, "boom"),
                AttemptResult::pass("B", 12).with_attempt(2),
            ],
        );
        assert_eq!(verdict.status, TestStatus::Pass);
        assert_eq!(verdict.retries(), 1);
        assert!(verdict.is_flaky());
        assert_eq!(verdict.total_duration_ms(), 22);
    }

    #[test]
    fn test_run_summary() {
        let verdicts = vec![
            UnitVerdict::from_attempts("A", vec![AttemptResult::pass("A", 100)]),
            UnitVerdict::from_attempts("B", vec![AttemptResult::fail("B", 50, "assertion")]),
            UnitVerdict::from_attempts("C", vec![AttemptResult::skip("C", "disabled")]),
        ];

        let summary = RunSummary::new(verdicts);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert!(!summary.is_successful());
        assert_eq!(summary.exit_code(), 1);
    }

    #[test]
    fn test_verdict_without_attempts_is_error() {
        let verdict = UnitVerdict::from_attempts("X", Vec::new());
        assert_eq!(verdict.status, TestStatus::Error);
    }
}
