//! Trial reports: JUnit XML for CI and a JSON/text summary

pub mod junit;
pub mod summary;

pub use junit::{to_junit_xml, write_junit};
pub use summary::{RunEntry, TestEntry, TrialSummary, TRIAL_SUMMARY_SCHEMA_ID, TRIAL_SUMMARY_SCHEMA_VERSION};

#[cfg(test)]
pub(crate) mod fixtures {
    use std::path::PathBuf;
    use std::time::Duration;

    use serde_json::{json, Value};

    use crate::state::TestStatus;
    use crate::suite::{SuiteDefinition, SuiteRun, TestSpec};

    fn definition(name: &str, tests: &[&str]) -> SuiteDefinition {
        SuiteDefinition {
            name: name.to_string(),
            dir: PathBuf::from("suites").join(name),
            tests: tests
                .iter()
                .map(|t| TestSpec {
                    name: t.to_string(),
                    path: PathBuf::from(t),
                })
                .collect(),
            resources: Value::Null,
            modifiers: Value::Null,
            config: Value::Null,
            sha256: String::new(),
        }
    }

    /// `sms`: pass, fail, error, skip. `voice`: pass.
    pub(crate) fn sample_runs() -> Vec<SuiteRun> {
        let mut sms = SuiteRun::new(
            &definition("sms", &["mo_mt.py", "long<text>.py", "crash.py", "later.py"]),
            &[],
        )
        .unwrap();
        {
            let tests = sms.tests_mut();
            tests[0].set_duration(Duration::from_millis(1500)).unwrap();
            tests[0].record_output("sent & received\n", "").unwrap();
            tests[0]
                .set_kpis(json!({"sms": {"latency_ms": 220}, "ok": true}))
                .unwrap();
            tests[0].pass().unwrap();
            tests[1].set_duration(Duration::from_millis(250)).unwrap();
            tests[1].fail("Assertion", "expected \"SMS\" <none>").unwrap();
            tests[2].error("Timeout", "no verdict after 5s").unwrap();
            tests[3].skip("not selected").unwrap();
        }
        sms.set_status(TestStatus::Fail);

        let mut voice = SuiteRun::new(&definition("voice", &["call.py"]), &[]).unwrap();
        voice.tests_mut()[0].pass().unwrap();
        voice.set_status(TestStatus::Pass);

        vec![sms, voice]
    }
}
