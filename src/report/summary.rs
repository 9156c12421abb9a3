//! Trial summary (trial_summary.json) and its text rendering

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::{Test, TestStatus};
use crate::suite::SuiteRun;
use crate::trial::trial_status;

/// Schema version for trial_summary.json
pub const TRIAL_SUMMARY_SCHEMA_VERSION: u32 = 1;

/// Schema identifier for trial_summary.json
pub const TRIAL_SUMMARY_SCHEMA_ID: &str = "lab-broker/trial_summary@1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestEntry {
    pub name: String,
    pub status: TestStatus,
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_message: Option<String>,
}

impl From<&Test> for TestEntry {
    fn from(test: &Test) -> Self {
        Self {
            name: test.name.clone(),
            status: test.status(),
            duration_secs: test.duration().as_secs_f64(),
            fail_type: test.fail_type().map(str::to_string),
            fail_message: test.fail_message().map(str::to_string),
        }
    }
}

/// One suite run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEntry {
    pub name: String,
    pub status: TestStatus,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub skipped: usize,
    pub duration_secs: f64,
    pub tests: Vec<TestEntry>,
}

impl From<&SuiteRun> for RunEntry {
    fn from(run: &SuiteRun) -> Self {
        Self {
            name: run.name.clone(),
            status: run.status(),
            passed: run.count(TestStatus::Pass),
            failed: run.count(TestStatus::Fail),
            errors: run.count(TestStatus::Error),
            skipped: run.count(TestStatus::Skip),
            duration_secs: run.duration().as_secs_f64(),
            tests: run.tests().iter().map(TestEntry::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialSummary {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// Trial directory name
    pub trial: String,

    /// When the summary was created
    pub created_at: DateTime<Utc>,

    /// Aggregated trial status
    pub status: TestStatus,

    pub runs: Vec<RunEntry>,

    /// Human-readable one-liner
    pub human_summary: String,
}

impl TrialSummary {
    pub fn from_runs(trial: impl Into<String>, runs: &[SuiteRun]) -> Self {
        let trial = trial.into();
        let runs: Vec<RunEntry> = runs.iter().map(RunEntry::from).collect();
        let status = trial_status(runs.iter().map(|r| r.status));
        let human_summary = Self::generate_human_summary(&trial, status, &runs);
        Self {
            schema_version: TRIAL_SUMMARY_SCHEMA_VERSION,
            schema_id: TRIAL_SUMMARY_SCHEMA_ID.to_string(),
            trial,
            created_at: Utc::now(),
            status,
            runs,
            human_summary,
        }
    }

    fn generate_human_summary(trial: &str, status: TestStatus, runs: &[RunEntry]) -> String {
        if runs.is_empty() {
            return format!("Trial {}: no suites run", trial);
        }
        let passed = runs.iter().filter(|r| r.status == TestStatus::Pass).count();
        let failed = runs
            .iter()
            .filter(|r| matches!(r.status, TestStatus::Fail | TestStatus::Error))
            .count();
        format!(
            "Trial {} {}: {}/{} suite runs passed, {} failed",
            trial,
            status,
            passed,
            runs.len(),
            failed
        )
    }

    /// Multi-line report: one line per suite run, one indented line per test
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.human_summary);
        for run in &self.runs {
            let _ = writeln!(
                out,
                "  {} {} ({} passed, {} failed, {} errors, {} skipped) {:.1}s",
                run.status,
                run.name,
                run.passed,
                run.failed,
                run.errors,
                run.skipped,
                run.duration_secs
            );
            for test in &run.tests {
                let _ = write!(out, "    {} {}", test.status, test.name);
                match (&test.fail_type, &test.fail_message) {
                    (Some(kind), Some(message)) => {
                        let _ = write!(out, ": {}: {}", kind, message);
                    }
                    (None, Some(message)) => {
                        let _ = write!(out, ": {}", message);
                    }
                    (Some(kind), None) => {
                        let _ = write!(out, ": {}", kind);
                    }
                    (None, None) => {}
                }
                out.push('\n');
            }
        }
        out
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Write to file
    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e)))?;
        fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::fixtures::sample_runs;
    use tempfile::TempDir;

    #[test]
    fn test_summary_counts_and_status() {
        let summary = TrialSummary::from_runs("trial-1", &sample_runs());
        assert_eq!(summary.status, TestStatus::Fail);
        assert_eq!(summary.runs.len(), 2);

        let sms = &summary.runs[0];
        assert_eq!((sms.passed, sms.failed, sms.errors, sms.skipped), (1, 1, 1, 1));
        assert_eq!(sms.tests[1].fail_type.as_deref(), Some("Assertion"));
        assert_eq!(
            summary.human_summary,
            "Trial trial-1 FAIL: 1/2 suite runs passed, 1 failed"
        );
    }

    #[test]
    fn test_empty_trial_is_unknown() {
        let summary = TrialSummary::from_runs("t", &[]);
        assert_eq!(summary.status, TestStatus::Unknown);
        assert_eq!(summary.human_summary, "Trial t: no suites run");
    }

    #[test]
    fn test_text_lists_every_test() {
        let text = TrialSummary::from_runs("trial-1", &sample_runs()).to_text();
        assert!(text.contains("  FAIL sms (1 passed, 1 failed, 1 errors, 1 skipped)"));
        assert!(text.contains("    FAIL long<text>.py: Assertion: expected \"SMS\" <none>\n"));
        assert!(text.contains("    SKIP later.py: not selected\n"));
        assert!(text.contains("    PASS call.py\n"));
    }

    #[test]
    fn test_json_file_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("trial_summary.json");
        let summary = TrialSummary::from_runs("trial-1", &sample_runs());
        summary.write_to_file(&path).unwrap();

        let loaded = TrialSummary::from_json(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.schema_id, TRIAL_SUMMARY_SCHEMA_ID);
        assert_eq!(loaded.runs, summary.runs);
    }
}
