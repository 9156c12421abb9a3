//! One execution of a suite with a set of scenarios

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use super::compose::{compose, EffectiveRequest};
use super::definition::SuiteDefinition;
use super::launcher::{LaunchContext, LaunchError, LaunchStatus, TestLauncher};
use super::scenario::Scenario;
use super::select::TestSelection;
use super::SuiteError;
use crate::kind::{DriverRegistry, ResourceDriver};
use crate::pool::{PoolError, ReservationGuard, ResourcePool, RetryPolicy};
use crate::signal::Cancellation;
use crate::state::{aggregate_status, Test, TestStatus};

/// Everything a suite run needs from its environment
pub struct RunContext<'a> {
    pub pool: &'a ResourcePool,
    pub launcher: &'a dyn TestLauncher,
    pub drivers: &'a DriverRegistry,
    pub selection: &'a TestSelection,
    pub retry: &'a RetryPolicy,
    pub test_timeout: Duration,
    pub cancel: &'a Cancellation,
    /// Parent of the per-test output directories
    pub output_dir: &'a Path,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteRun {
    /// `suite` or `suite:scenario1+scenario2`
    pub name: String,
    pub suite: String,
    pub scenarios: Vec<String>,
    pub effective: EffectiveRequest,
    tests: Vec<Test>,
    status: TestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    owner: Option<String>,
    /// Reserved resources as handed to the tests
    #[serde(skip_serializing_if = "Option::is_none")]
    reservation: Option<Value>,
}

/// Run name from suite and scenario references
pub fn run_name(suite: &str, scenarios: &[String]) -> String {
    if scenarios.is_empty() {
        suite.to_string()
    } else {
        format!("{}:{}", suite, scenarios.join("+"))
    }
}

impl SuiteRun {
    pub fn new(definition: &SuiteDefinition, scenarios: &[Scenario]) -> Result<Self, SuiteError> {
        let effective = compose(definition, scenarios)?;
        let scenario_names: Vec<String> = scenarios.iter().map(|s| s.name.clone()).collect();
        Ok(Self {
            name: run_name(&definition.name, &scenario_names),
            suite: definition.name.clone(),
            scenarios: scenario_names,
            effective,
            tests: definition
                .tests
                .iter()
                .map(|spec| Test::new(&spec.name, &spec.path))
                .collect(),
            status: TestStatus::Unknown,
            started_at: None,
            duration_secs: 0.0,
            owner: None,
            reservation: None,
        })
    }

    pub fn tests(&self) -> &[Test] {
        &self.tests
    }

    pub fn status(&self) -> TestStatus {
        self.status
    }

    #[cfg(test)]
    pub(crate) fn tests_mut(&mut self) -> &mut [Test] {
        &mut self.tests
    }

    #[cfg(test)]
    pub(crate) fn set_status(&mut self, status: TestStatus) {
        self.status = status;
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.duration_secs).unwrap_or_default()
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn reservation(&self) -> Option<&Value> {
        self.reservation.as_ref()
    }

    /// Verdict from the current test statuses
    pub fn determine_status(&self) -> TestStatus {
        aggregate_status(self.tests.iter().map(Test::status))
    }

    pub fn count(&self, status: TestStatus) -> usize {
        self.tests.iter().filter(|t| t.status() == status).count()
    }

    /// Skip every test the selection does not name
    pub fn apply_selection(&mut self, selection: &TestSelection) -> Result<usize, SuiteError> {
        let mut skipped = 0;
        for test in &mut self.tests {
            if !test.is_terminal() && !selection.is_selected(&test.name) {
                test.skip("not selected")?;
                skipped += 1;
            }
        }
        Ok(skipped)
    }

    /// Mark every not yet finished test ERROR
    fn error_open_tests(&mut self, fail_type: &str, message: &str) -> Result<(), SuiteError> {
        for test in &mut self.tests {
            if !test.is_terminal() {
                test.error(fail_type, message)?;
            }
        }
        Ok(())
    }

    fn finish(&mut self, start: Instant) -> TestStatus {
        self.duration_secs = start.elapsed().as_secs_f64();
        self.status = self.determine_status();
        info!(
            run = %self.name,
            status = %self.status,
            passed = self.count(TestStatus::Pass),
            failed = self.count(TestStatus::Fail),
            errors = self.count(TestStatus::Error),
            skipped = self.count(TestStatus::Skip),
            "suite run finished"
        );
        self.status
    }

    /// Reserve, run every selected test in order, free.
    ///
    /// Reservation shortage and bad requests turn the tests ERROR; lock and
    /// ledger failures are returned since no later run could succeed either.
    pub fn run(&mut self, ctx: &RunContext<'_>) -> Result<TestStatus, SuiteError> {
        let start = Instant::now();
        self.started_at = Some(Utc::now());
        info!(run = %self.name, tests = self.tests.len(), "suite run starting");

        self.apply_selection(ctx.selection)?;
        if self.tests.iter().all(Test::is_terminal) {
            return Ok(self.finish(start));
        }

        let owner = format!("{}-{}", self.suite, ulid::Ulid::new());
        let reservation = match ctx.pool.reserve_with_retry(
            &owner,
            &self.effective.resources,
            &self.effective.modifiers,
            ctx.retry,
            || ctx.cancel.is_cancelled(),
        ) {
            Ok(reservation) => reservation,
            Err(e) if is_fatal(&e) => return Err(SuiteError::Pool(e)),
            Err(e) => {
                let (fail_type, message) = if ctx.cancel.is_cancelled() {
                    ("Cancelled", "cancelled".to_string())
                } else {
                    ("ResourceError", e.to_string())
                };
                error!(run = %self.name, error = %e, "cannot reserve resources");
                self.error_open_tests(fail_type, &message)?;
                return Ok(self.finish(start));
            }
        };

        self.owner = Some(owner);
        self.reservation = Some(reservation.to_tree());
        let guard = ReservationGuard::new(ctx.pool, reservation);

        let result = self.run_reserved(ctx, &guard);

        if let Err(e) = guard.release() {
            warn!(run = %self.name, error = %e, "failed to free resources");
        }
        result?;
        Ok(self.finish(start))
    }

    fn run_reserved(&mut self, ctx: &RunContext<'_>, guard: &ReservationGuard<'_>) -> Result<(), SuiteError> {
        let reservation = guard.reservation();

        let mut drivers: Vec<Box<dyn ResourceDriver>> = Vec::new();
        let started = reservation.all_items().iter().try_for_each(|item| {
            let mut driver = ctx.drivers.create(item.kind.as_str(), &item.attrs)?;
            driver.start()?;
            drivers.push(driver);
            Ok::<_, crate::kind::DriverError>(())
        });
        if let Err(e) = started {
            error!(run = %self.name, error = %e, "resource driver failed");
            self.error_open_tests("DriverError", &e.to_string())?;
            stop_drivers(&mut drivers);
            return Ok(());
        }

        let run_dir = ctx.output_dir.join(dir_name(&self.name));
        for pos in 0..self.tests.len() {
            if self.tests[pos].is_terminal() {
                continue;
            }
            if ctx.cancel.is_cancelled() {
                self.tests[pos].error("Cancelled", "cancelled")?;
                continue;
            }

            let test_dir = run_dir.join(dir_name(&self.tests[pos].name));
            ctx.cancel.set_current_test(Some(&self.tests[pos].name));
            let launch_ctx = LaunchContext {
                run_dir: &test_dir,
                reservation,
                config: &self.effective.config,
                timeout: ctx.test_timeout,
                cancel: ctx.cancel,
            };
            let test_start = Instant::now();
            let outcome = ctx.launcher.launch(&self.tests[pos], &launch_ctx);
            ctx.cancel.set_current_test(None);

            let test = &mut self.tests[pos];
            match outcome {
                Ok(outcome) => {
                    test.set_duration(outcome.duration)?;
                    test.record_output(outcome.stdout, outcome.stderr)?;
                    test.set_kpis(outcome.kpis)?;
                    match outcome.status {
                        LaunchStatus::Pass => test.pass()?,
                        LaunchStatus::Fail => test.fail(
                            outcome.fail_type.unwrap_or_else(|| "Fail".to_string()),
                            outcome.fail_message.unwrap_or_default(),
                        )?,
                    }
                }
                Err(e) => {
                    test.set_duration(test_start.elapsed())?;
                    let fail_type = match e {
                        LaunchError::Timeout(_) => "Timeout",
                        LaunchError::Cancelled => "Cancelled",
                        _ => "LaunchError",
                    };
                    test.error(fail_type, e.to_string())?;
                }
            }
            info!(run = %self.name, test = %test.name, status = %test.status(), "test finished");
        }

        stop_drivers(&mut drivers);
        Ok(())
    }
}

fn stop_drivers(drivers: &mut [Box<dyn ResourceDriver>]) {
    for driver in drivers.iter_mut().rev() {
        if let Err(e) = driver.stop() {
            warn!(driver = driver.name(), error = %e, "failed to stop resource driver");
        }
    }
}

/// Errors after which the shared state cannot be trusted
fn is_fatal(err: &PoolError) -> bool {
    matches!(
        err,
        PoolError::Lock(_) | PoolError::Ledger(_) | PoolError::ReservationConflict { .. } | PoolError::Io { .. }
    )
}

fn dir_name(name: &str) -> PathBuf {
    PathBuf::from(name.replace(['/', '\\'], "_"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Catalog, PoolOptions};
    use crate::suite::definition::TestSpec;
    use crate::suite::launcher::LaunchOutcome;
    use serde_json::json;
    use std::cell::RefCell;
    use tempfile::TempDir;

    /// Scripted verdicts by test name
    struct FakeLauncher {
        fail: Vec<&'static str>,
        seen: RefCell<Vec<(String, usize)>>,
    }

    impl TestLauncher for FakeLauncher {
        fn launch(&self, test: &Test, ctx: &LaunchContext<'_>) -> Result<LaunchOutcome, LaunchError> {
            self.seen
                .borrow_mut()
                .push((test.name.clone(), ctx.reservation.len()));
            if test.name == "hangs" {
                return Err(LaunchError::Timeout(ctx.timeout));
            }
            Ok(if self.fail.contains(&test.name.as_str()) {
                LaunchOutcome::fail(Duration::from_millis(5), "Assertion", "expected SMS")
            } else {
                LaunchOutcome::pass(Duration::from_millis(5))
            })
        }
    }

    fn definition(tests: &[&str], resources: Value) -> SuiteDefinition {
        SuiteDefinition {
            name: "sms".to_string(),
            dir: PathBuf::from("suites/sms"),
            tests: tests
                .iter()
                .map(|n| TestSpec {
                    name: n.to_string(),
                    path: PathBuf::from(n),
                })
                .collect(),
            resources,
            modifiers: Value::Null,
            config: json!({"msc": {"auth": true}}),
            sha256: "ab".to_string(),
        }
    }

    fn pool(temp: &TempDir) -> ResourcePool {
        let catalog = Catalog::from_value(&json!({"modem": [{"label": "a"}, {"label": "b"}]})).unwrap();
        ResourcePool::new(catalog, temp.path().join("state"), PoolOptions::default()).unwrap()
    }

    fn run(
        run: &mut SuiteRun,
        pool: &ResourcePool,
        launcher: &dyn TestLauncher,
        selection: &TestSelection,
        cancel: &Cancellation,
        out: &Path,
    ) -> Result<TestStatus, SuiteError> {
        let drivers = DriverRegistry::default();
        let retry = RetryPolicy::once();
        run.run(&RunContext {
            pool,
            launcher,
            drivers: &drivers,
            selection,
            retry: &retry,
            test_timeout: Duration::from_secs(5),
            cancel,
            output_dir: out,
        })
    }

    #[test]
    fn test_all_pass() {
        let temp = TempDir::new().unwrap();
        let pool = pool(&temp);
        let launcher = FakeLauncher { fail: vec![], seen: RefCell::default() };
        let mut suite_run = SuiteRun::new(&definition(&["one", "two"], json!({"modem": [{"times": 2}]})), &[]).unwrap();

        let status = run(&mut suite_run, &pool, &launcher, &TestSelection::all(), &Cancellation::never(), temp.path()).unwrap();
        assert_eq!(status, TestStatus::Pass);
        assert_eq!(
            launcher.seen.borrow().as_slice(),
            &[("one".to_string(), 2), ("two".to_string(), 2)]
        );
        assert!(suite_run.owner().unwrap().starts_with("sms-"));
        assert!(pool.reserved().unwrap().is_empty(), "reservation freed after run");
    }

    #[test]
    fn test_failure_and_timeout_statuses() {
        let temp = TempDir::new().unwrap();
        let pool = pool(&temp);
        let launcher = FakeLauncher { fail: vec!["two"], seen: RefCell::default() };
        let mut suite_run = SuiteRun::new(&definition(&["one", "two", "hangs"], json!({})), &[]).unwrap();

        let status = run(&mut suite_run, &pool, &launcher, &TestSelection::all(), &Cancellation::never(), temp.path()).unwrap();
        assert_eq!(status, TestStatus::Fail);
        let statuses: Vec<TestStatus> = suite_run.tests().iter().map(Test::status).collect();
        assert_eq!(statuses, vec![TestStatus::Pass, TestStatus::Fail, TestStatus::Error]);
        assert_eq!(suite_run.tests()[1].fail_type(), Some("Assertion"));
        assert_eq!(suite_run.tests()[2].fail_type(), Some("Timeout"));
    }

    #[test]
    fn test_selection_skips_before_running() {
        let temp = TempDir::new().unwrap();
        let pool = pool(&temp);
        let launcher = FakeLauncher { fail: vec![], seen: RefCell::default() };
        let mut suite_run = SuiteRun::new(&definition(&["mo_sms", "ussd"], json!({})), &[]).unwrap();
        let selection = TestSelection::from_patterns(&["mo_*"]).unwrap();

        let status = run(&mut suite_run, &pool, &launcher, &selection, &Cancellation::never(), temp.path()).unwrap();
        assert_eq!(status, TestStatus::Pass);
        assert_eq!(suite_run.tests()[1].status(), TestStatus::Skip);
        assert_eq!(launcher.seen.borrow().len(), 1);
    }

    #[test]
    fn test_all_skipped_is_unknown_and_reserves_nothing() {
        let temp = TempDir::new().unwrap();
        let pool = pool(&temp);
        let launcher = FakeLauncher { fail: vec![], seen: RefCell::default() };
        let mut suite_run = SuiteRun::new(&definition(&["ussd"], json!({"modem": [{"times": 9}]})), &[]).unwrap();
        let selection = TestSelection::from_patterns(&["nothing"]).unwrap();

        let status = run(&mut suite_run, &pool, &launcher, &selection, &Cancellation::never(), temp.path()).unwrap();
        assert_eq!(status, TestStatus::Unknown);
        assert!(suite_run.owner().is_none());
    }

    #[test]
    fn test_unsatisfiable_request_errors_tests() {
        let temp = TempDir::new().unwrap();
        let pool = pool(&temp);
        let launcher = FakeLauncher { fail: vec![], seen: RefCell::default() };
        let mut suite_run = SuiteRun::new(&definition(&["one", "two"], json!({"modem": [{"times": 3}]})), &[]).unwrap();

        let status = run(&mut suite_run, &pool, &launcher, &TestSelection::all(), &Cancellation::never(), temp.path()).unwrap();
        assert_eq!(status, TestStatus::Fail);
        assert!(suite_run.tests().iter().all(|t| t.status() == TestStatus::Error));
        assert!(suite_run.tests()[0].fail_message().unwrap().contains("modem x3"));
        assert!(launcher.seen.borrow().is_empty());
    }

    #[test]
    fn test_cancelled_run_errors_remaining_tests() {
        let temp = TempDir::new().unwrap();
        let pool = pool(&temp);
        let launcher = FakeLauncher { fail: vec![], seen: RefCell::default() };
        let mut suite_run = SuiteRun::new(&definition(&["one", "two"], json!({})), &[]).unwrap();
        let cancel = Cancellation::never();
        cancel.cancel();

        let status = run(&mut suite_run, &pool, &launcher, &TestSelection::all(), &cancel, temp.path()).unwrap();
        assert_eq!(status, TestStatus::Fail);
        assert!(suite_run
            .tests()
            .iter()
            .all(|t| t.fail_type() == Some("Cancelled")));
        assert!(pool.reserved().unwrap().is_empty());
    }

    #[test]
    fn test_run_name() {
        assert_eq!(run_name("sms", &[]), "sms");
        assert_eq!(
            run_name("sms", &["trx".to_string(), "band@GSM-900".to_string()]),
            "sms:trx+band@GSM-900"
        );
    }
}
