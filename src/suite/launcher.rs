//! Test launchers
//!
//! A `TestLauncher` executes one test with a reservation and returns its
//! verdict. `CommandLauncher` runs the test file as a child process.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use crate::pool::Reservation;
use crate::signal::Cancellation;
use crate::state::Test;

/// Environment variable naming the reservation JSON file
pub const RESERVATION_ENV: &str = "LAB_BROKER_RESERVATION";

/// Environment variable naming the effective config JSON file
pub const CONFIG_ENV: &str = "LAB_BROKER_CONFIG";

/// Environment variable naming the test's output directory
pub const RUN_DIR_ENV: &str = "LAB_BROKER_RUN_DIR";

/// KPI file a test may leave in its run directory
pub const KPI_FILE: &str = "kpis.json";

/// Launch errors; each one makes the test ERROR
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("cannot start {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("test timed out after {0:?}")]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("invalid kpis.json: {0}")]
    Kpis(serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

/// Inputs a launcher gets for one test
pub struct LaunchContext<'a> {
    /// Output directory for this test; created by the launcher
    pub run_dir: &'a Path,
    pub reservation: &'a Reservation,
    /// Effective suite config
    pub config: &'a Value,
    pub timeout: Duration,
    pub cancel: &'a Cancellation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchStatus {
    Pass,
    Fail,
}

/// What a test run to completion produced
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchOutcome {
    pub status: LaunchStatus,
    pub duration: Duration,
    pub stdout: String,
    pub stderr: String,
    pub fail_type: Option<String>,
    pub fail_message: Option<String>,
    pub kpis: Value,
}

impl LaunchOutcome {
    pub fn pass(duration: Duration) -> Self {
        Self {
            status: LaunchStatus::Pass,
            duration,
            stdout: String::new(),
            stderr: String::new(),
            fail_type: None,
            fail_message: None,
            kpis: Value::Null,
        }
    }

    pub fn fail(duration: Duration, fail_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: LaunchStatus::Fail,
            fail_type: Some(fail_type.into()),
            fail_message: Some(message.into()),
            ..Self::pass(duration)
        }
    }
}

pub trait TestLauncher {
    fn launch(&self, test: &Test, ctx: &LaunchContext<'_>) -> Result<LaunchOutcome, LaunchError>;
}

/// Runs each test file as an executable
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    /// Optional interpreter the test path is passed to (e.g. `python3`)
    pub interpreter: Option<PathBuf>,
    /// Time between SIGTERM and kill
    pub termination_grace: Duration,
}

impl Default for CommandLauncher {
    fn default() -> Self {
        Self {
            interpreter: None,
            termination_grace: Duration::from_secs(5),
        }
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(50);

impl CommandLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_inputs(&self, ctx: &LaunchContext<'_>) -> Result<(PathBuf, PathBuf), LaunchError> {
        fs::create_dir_all(ctx.run_dir)?;
        let reservation_path = ctx.run_dir.join("reservation.json");
        let reservation = serde_json::json!({
            "owner": ctx.reservation.owner(),
            "resources": ctx.reservation.to_tree(),
        });
        fs::write(
            &reservation_path,
            serde_json::to_vec_pretty(&reservation).map_err(|e| LaunchError::Other(e.to_string()))?,
        )?;

        let config_path = ctx.run_dir.join("config.json");
        fs::write(
            &config_path,
            serde_json::to_vec_pretty(ctx.config).map_err(|e| LaunchError::Other(e.to_string()))?,
        )?;
        Ok((reservation_path, config_path))
    }

    fn command(&self, script: &Path) -> Command {
        match &self.interpreter {
            Some(interpreter) => {
                let mut command = Command::new(interpreter);
                command.arg(script);
                command
            }
            None => Command::new(script),
        }
    }

    /// SIGTERM, then kill after the grace period
    fn terminate_child(&self, child: &mut Child, immediate: bool) -> io::Result<()> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            if !immediate {
                let pid = Pid::from_raw(child.id() as i32);
                let _ = signal::kill(pid, Signal::SIGTERM);

                let start = Instant::now();
                while start.elapsed() < self.termination_grace {
                    if child.try_wait()?.is_some() {
                        return Ok(());
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
        }
        #[cfg(not(unix))]
        let _ = immediate;

        let _ = child.kill();
        child.wait().map(|_| ())
    }
}

fn capture<R: Read + Send + 'static>(stream: Option<R>) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut stream) = stream {
            let _ = stream.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn describe_exit(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit status {}", code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("killed by signal {}", signal);
        }
    }
    "terminated".to_string()
}

impl TestLauncher for CommandLauncher {
    fn launch(&self, test: &Test, ctx: &LaunchContext<'_>) -> Result<LaunchOutcome, LaunchError> {
        let script = fs::canonicalize(&test.path).map_err(|source| LaunchError::Spawn {
            path: test.path.clone(),
            source,
        })?;
        let (reservation_path, config_path) = self.write_inputs(ctx)?;

        let start = Instant::now();
        let mut child = self
            .command(&script)
            .current_dir(ctx.run_dir)
            .env(RESERVATION_ENV, &reservation_path)
            .env(CONFIG_ENV, &config_path)
            .env(RUN_DIR_ENV, ctx.run_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                path: script.clone(),
                source,
            })?;
        debug!(test = %test.name, pid = child.id(), "test started");

        let stdout = capture(child.stdout.take());
        let stderr = capture(child.stderr.take());

        let status = loop {
            if ctx.cancel.is_cancelled() {
                self.terminate_child(&mut child, ctx.cancel.should_exit_immediately())?;
                return Err(LaunchError::Cancelled);
            }
            if start.elapsed() >= ctx.timeout {
                warn!(test = %test.name, timeout_secs = ctx.timeout.as_secs(), "test timed out");
                self.terminate_child(&mut child, false)?;
                return Err(LaunchError::Timeout(ctx.timeout));
            }
            match child.try_wait()? {
                Some(status) => break status,
                None => std::thread::sleep(POLL_INTERVAL),
            }
        };
        let duration = start.elapsed();

        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        let kpi_path = ctx.run_dir.join(KPI_FILE);
        let kpis = if kpi_path.is_file() {
            let raw = fs::read(&kpi_path)?;
            serde_json::from_slice(&raw).map_err(LaunchError::Kpis)?
        } else {
            Value::Null
        };

        let mut outcome = if status.success() {
            LaunchOutcome::pass(duration)
        } else {
            LaunchOutcome::fail(duration, "ExitStatus", describe_exit(status))
        };
        outcome.stdout = stdout;
        outcome.stderr = stderr;
        outcome.kpis = kpis;
        Ok(outcome)
    }
}
