//! JUnit XML
//!
//! One `<testsuite>` per suite run, one `<testcase>` per test. Tests left
//! UNKNOWN (never reached a verdict) are reported as errors.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

use serde_json::Value;

use crate::state::{Test, TestStatus};
use crate::suite::SuiteRun;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Counts {
    tests: usize,
    failures: usize,
    errors: usize,
    skipped: usize,
}

impl Counts {
    fn of(tests: &[Test]) -> Self {
        tests.iter().fold(Self::default(), |mut c, t| {
            c.tests += 1;
            match t.status() {
                TestStatus::Fail => c.failures += 1,
                TestStatus::Error | TestStatus::Unknown => c.errors += 1,
                TestStatus::Skip => c.skipped += 1,
                TestStatus::Pass => {}
            }
            c
        })
    }

    fn add(mut self, other: Counts) -> Self {
        self.tests += other.tests;
        self.failures += other.failures;
        self.errors += other.errors;
        self.skipped += other.skipped;
        self
    }
}

/// Render a trial's suite runs as a JUnit XML document
pub fn to_junit_xml(trial_name: &str, runs: &[SuiteRun]) -> String {
    let total = runs
        .iter()
        .map(|r| Counts::of(r.tests()))
        .fold(Counts::default(), Counts::add);
    let total_time: f64 = runs.iter().map(|r| r.duration().as_secs_f64()).sum();

    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(
        xml,
        "<testsuites name=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"{}\" skipped=\"{}\" time=\"{:.3}\">",
        escape(trial_name),
        total.tests,
        total.failures,
        total.errors,
        total.skipped,
        total_time
    );
    for (id, run) in runs.iter().enumerate() {
        write_suite(&mut xml, id, run);
    }
    xml.push_str("</testsuites>\n");
    xml
}

/// Write the JUnit document to `path`
pub fn write_junit(path: &Path, trial_name: &str, runs: &[SuiteRun]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, to_junit_xml(trial_name, runs))
}

fn write_suite(xml: &mut String, id: usize, run: &SuiteRun) {
    let counts = Counts::of(run.tests());
    let _ = write!(
        xml,
        "  <testsuite name=\"{}\" id=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"{}\" skipped=\"{}\" time=\"{:.3}\"",
        escape(&run.name),
        id,
        counts.tests,
        counts.failures,
        counts.errors,
        counts.skipped,
        run.duration().as_secs_f64()
    );
    if let Some(started) = run.started_at() {
        let _ = write!(xml, " timestamp=\"{}\"", started.format("%Y-%m-%dT%H:%M:%S"));
    }
    xml.push_str(">\n");

    let mut properties = vec![
        ("suite".to_string(), run.suite.clone()),
        ("status".to_string(), run.status().to_string()),
    ];
    if !run.scenarios.is_empty() {
        properties.push(("scenarios".to_string(), run.scenarios.join("+")));
    }
    write_properties(xml, "    ", &properties);

    for test in run.tests() {
        write_case(xml, run, test);
    }
    xml.push_str("  </testsuite>\n");
}

fn write_case(xml: &mut String, run: &SuiteRun, test: &Test) {
    let _ = writeln!(
        xml,
        "    <testcase name=\"{}\" classname=\"{}\" time=\"{:.3}\">",
        escape(&test.name),
        escape(&run.name),
        test.duration().as_secs_f64()
    );

    let mut kpis = Vec::new();
    flatten_kpis("", test.kpis(), &mut kpis);
    write_properties(xml, "      ", &kpis);

    let fail_type = test.fail_type().unwrap_or(test.status().as_str());
    let message = test.fail_message().unwrap_or("");
    match test.status() {
        TestStatus::Pass => {}
        TestStatus::Fail => {
            let _ = writeln!(
                xml,
                "      <failure type=\"{}\" message=\"{}\"/>",
                escape(fail_type),
                escape(message)
            );
        }
        TestStatus::Error => {
            let _ = writeln!(
                xml,
                "      <error type=\"{}\" message=\"{}\"/>",
                escape(fail_type),
                escape(message)
            );
        }
        TestStatus::Unknown => {
            let _ = writeln!(
                xml,
                "      <error type=\"UNKNOWN\" message=\"test did not reach a verdict\"/>"
            );
        }
        TestStatus::Skip => {
            let _ = writeln!(xml, "      <skipped message=\"{}\"/>", escape(message));
        }
    }

    if !test.stdout().is_empty() {
        let _ = writeln!(xml, "      <system-out>{}</system-out>", escape(test.stdout()));
    }
    if !test.stderr().is_empty() {
        let _ = writeln!(xml, "      <system-err>{}</system-err>", escape(test.stderr()));
    }
    xml.push_str("    </testcase>\n");
}

fn write_properties(xml: &mut String, indent: &str, properties: &[(String, String)]) {
    if properties.is_empty() {
        return;
    }
    let _ = writeln!(xml, "{}<properties>", indent);
    for (name, value) in properties {
        let _ = writeln!(
            xml,
            "{}  <property name=\"{}\" value=\"{}\"/>",
            indent,
            escape(name),
            escape(value)
        );
    }
    let _ = writeln!(xml, "{}</properties>", indent);
}

/// `{"a": {"b": 1}}` -> `[("a.b", "1")]`
fn flatten_kpis(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_kpis(&path, child, out);
            }
        }
        Value::Null if prefix.is_empty() => {}
        Value::String(s) => out.push((prefix.to_string(), s.clone())),
        other => out.push((prefix.to_string(), other.to_string())),
    }
}

/// Escape markup characters and drop characters XML 1.0 cannot carry
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\t' | '\n' | '\r' => out.push(c),
            c if (c as u32) < 0x20 => {}
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::fixtures::sample_runs;
    use crate::suite::{SuiteDefinition, TestSpec};
    use tempfile::TempDir;

    #[test]
    fn test_counts_per_suite_and_total() {
        let xml = to_junit_xml("trial-1", &sample_runs());
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains(
            "<testsuites name=\"trial-1\" tests=\"5\" failures=\"1\" errors=\"1\" skipped=\"1\""
        ));
        assert!(xml.contains(
            "<testsuite name=\"sms\" id=\"0\" tests=\"4\" failures=\"1\" errors=\"1\" skipped=\"1\""
        ));
        assert!(xml.contains(
            "<testsuite name=\"voice\" id=\"1\" tests=\"1\" failures=\"0\" errors=\"0\" skipped=\"0\""
        ));
        assert_eq!(xml.matches("<testcase ").count(), 5);
    }

    #[test]
    fn test_verdict_elements_are_escaped() {
        let xml = to_junit_xml("t", &sample_runs());
        assert!(xml.contains("name=\"long&lt;text&gt;.py\""));
        assert!(xml.contains(
            "<failure type=\"Assertion\" message=\"expected &quot;SMS&quot; &lt;none&gt;\"/>"
        ));
        assert!(xml.contains("<error type=\"Timeout\" message=\"no verdict after 5s\"/>"));
        assert!(xml.contains("<skipped message=\"not selected\"/>"));
        assert!(xml.contains("<system-out>sent &amp; received\n</system-out>"));
        assert!(xml.contains("time=\"1.500\""));
    }

    #[test]
    fn test_kpis_become_properties() {
        let xml = to_junit_xml("t", &sample_runs());
        assert!(xml.contains("<property name=\"sms.latency_ms\" value=\"220\"/>"));
        assert!(xml.contains("<property name=\"ok\" value=\"true\"/>"));
    }

    #[test]
    fn test_unknown_test_counts_as_error() {
        let definition = SuiteDefinition {
            name: "fresh".to_string(),
            dir: "suites/fresh".into(),
            tests: vec![TestSpec {
                name: "idle.py".to_string(),
                path: "idle.py".into(),
            }],
            resources: Value::Null,
            modifiers: Value::Null,
            config: Value::Null,
            sha256: String::new(),
        };
        let fresh = SuiteRun::new(&definition, &[]).unwrap();
        let xml = to_junit_xml("t", &[fresh]);
        assert!(xml.contains("errors=\"1\""));
        assert!(xml.contains("type=\"UNKNOWN\""));
    }

    #[test]
    fn test_escape_drops_control_characters() {
        assert_eq!(escape("a\u{1}b\tc"), "ab\tc");
        assert_eq!(escape("'x'"), "&apos;x&apos;");
    }

    #[test]
    fn test_write_junit_creates_parent() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out").join("junit.xml");
        write_junit(&path, "t", &sample_runs()).unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains("</testsuites>"));
    }
}
