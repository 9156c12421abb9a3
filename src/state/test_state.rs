//! Per-test status and captured results

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{next_seq, TerminalState};

/// Test status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestStatus {
    /// Not run yet, or still running
    Unknown,
    Pass,
    Fail,
    /// The test could not be run to a verdict
    Error,
    Skip,
}

impl TerminalState for TestStatus {
    fn is_terminal(&self) -> bool {
        !matches!(self, TestStatus::Unknown)
    }
}

impl TestStatus {
    pub fn can_transition_to(&self, target: TestStatus) -> bool {
        matches!(
            (self, target),
            (
                TestStatus::Unknown,
                TestStatus::Pass | TestStatus::Fail | TestStatus::Error | TestStatus::Skip
            )
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Unknown => "UNKNOWN",
            TestStatus::Pass => "PASS",
            TestStatus::Fail => "FAIL",
            TestStatus::Error => "ERROR",
            TestStatus::Skip => "SKIP",
        }
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors for test state operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TestStateError {
    #[error("invalid status transition for '{test}' from {from} to {to}")]
    InvalidTransition {
        test: String,
        from: TestStatus,
        to: TestStatus,
    },

    #[error("test '{test}' is already {status}")]
    Terminal { test: String, status: TestStatus },
}

/// One test of a suite run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Test {
    pub name: String,
    pub path: PathBuf,
    status: TestStatus,
    #[serde(with = "duration_secs")]
    duration: Duration,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fail_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fail_message: Option<String>,
    #[serde(default)]
    kpis: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    finished_at: Option<DateTime<Utc>>,
    seq: u64,
}

impl Test {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            status: TestStatus::Unknown,
            duration: Duration::ZERO,
            stdout: String::new(),
            stderr: String::new(),
            fail_type: None,
            fail_message: None,
            kpis: Value::Null,
            finished_at: None,
            seq: next_seq(),
        }
    }

    pub fn status(&self) -> TestStatus {
        self.status
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    pub fn fail_type(&self) -> Option<&str> {
        self.fail_type.as_deref()
    }

    pub fn fail_message(&self) -> Option<&str> {
        self.fail_message.as_deref()
    }

    pub fn kpis(&self) -> &Value {
        &self.kpis
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn ensure_open(&self) -> Result<(), TestStateError> {
        if self.is_terminal() {
            return Err(TestStateError::Terminal {
                test: self.name.clone(),
                status: self.status,
            });
        }
        Ok(())
    }

    pub fn set_duration(&mut self, duration: Duration) -> Result<(), TestStateError> {
        self.ensure_open()?;
        self.duration = duration;
        Ok(())
    }

    pub fn record_output(&mut self, stdout: impl Into<String>, stderr: impl Into<String>) -> Result<(), TestStateError> {
        self.ensure_open()?;
        self.stdout = stdout.into();
        self.stderr = stderr.into();
        Ok(())
    }

    pub fn set_kpis(&mut self, kpis: Value) -> Result<(), TestStateError> {
        self.ensure_open()?;
        self.kpis = kpis;
        Ok(())
    }

    /// Move to a terminal status
    pub fn transition(&mut self, status: TestStatus) -> Result<(), TestStateError> {
        if !self.status.can_transition_to(status) {
            return Err(TestStateError::InvalidTransition {
                test: self.name.clone(),
                from: self.status,
                to: status,
            });
        }
        self.status = status;
        self.finished_at = Some(Utc::now());
        self.seq = next_seq();
        Ok(())
    }

    pub fn pass(&mut self) -> Result<(), TestStateError> {
        self.transition(TestStatus::Pass)
    }

    pub fn fail(&mut self, fail_type: impl Into<String>, message: impl Into<String>) -> Result<(), TestStateError> {
        self.transition(TestStatus::Fail)?;
        self.fail_type = Some(fail_type.into());
        self.fail_message = Some(message.into());
        Ok(())
    }

    pub fn error(&mut self, fail_type: impl Into<String>, message: impl Into<String>) -> Result<(), TestStateError> {
        self.transition(TestStatus::Error)?;
        self.fail_type = Some(fail_type.into());
        self.fail_message = Some(message.into());
        Ok(())
    }

    pub fn skip(&mut self, reason: impl Into<String>) -> Result<(), TestStateError> {
        self.transition(TestStatus::Skip)?;
        self.fail_message = Some(reason.into());
        Ok(())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::try_from_secs_f64(secs).unwrap_or_default())
    }
}
