//! lab-broker CLI
//!
//! Entry point for the `lab-broker` command-line tool.

use clap::{Parser, Subcommand};
use lab_broker::config::{env_overrides, load_toml_file, EffectiveConfig};
use lab_broker::logging::{init_tracing, LogFormat};
use lab_broker::pool::{PoolError, ResourcePool, RetryPolicy};
use lab_broker::report::{write_junit, TrialSummary};
use lab_broker::signal::{SignalHandler, EXIT_CODE_CANCELLED};
use lab_broker::suite::{load_run, CommandLauncher, RunContext, SuiteError, TestSelection};
use lab_broker::{DriverRegistry, LabConfig, TestStatus, Trial, TrialError};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process;
use tracing::{error, info};

const EXIT_OK: i32 = 0;
const EXIT_CONFIG: i32 = 1;
const EXIT_TRIAL: i32 = 2;
const EXIT_SUITE_FAILED: i32 = 3;
const EXIT_NOT_SOLVABLE: i32 = 4;
const EXIT_LEDGER: i32 = 5;

const SUMMARY_FILE: &str = "trial_summary.json";

#[derive(Parser)]
#[command(name = "lab-broker")]
#[command(about = "Shared lab resource broker and trial runner", version)]
struct Cli {
    /// Config file (default: ./lab-broker.toml if present)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify a trial's package checksums
    Verify {
        /// Trial directory, or a name under the configured trials_dir
        trial: PathBuf,
    },

    /// Write checksums.sha256 for a trial directory
    Manifest {
        trial: PathBuf,
    },

    /// Verify a trial and run suites against it
    Run {
        trial: PathBuf,

        /// `suite` or `suite:scenario1+scenario2`, run in order
        #[arg(required = true)]
        runs: Vec<String>,

        /// Only run tests whose name matches (glob, repeatable)
        #[arg(long, short = 'f')]
        filter: Vec<String>,

        /// Write JUnit XML here
        #[arg(long)]
        junit: Option<PathBuf>,

        /// Unpack this package before running (repeatable)
        #[arg(long)]
        unpack: Vec<String>,

        /// Interpreter test files are passed to (default: execute directly)
        #[arg(long)]
        interpreter: Option<PathBuf>,
    },

    /// Reserve resources and leave them reserved until freed or the holder exits
    Reserve {
        /// Owner id recorded in the ledger
        #[arg(long)]
        owner: String,

        /// Request file, TOML or JSON (`{kind: [{times, ...}]}`)
        #[arg(long)]
        request: PathBuf,

        /// Modifiers file, TOML or JSON
        #[arg(long)]
        modifiers: Option<PathBuf>,

        /// Wait up to reserve_timeout_secs for busy resources
        #[arg(long)]
        wait: bool,

        /// Process holding the reservation; it stays reserved until this
        /// process exits. Defaults to the calling shell.
        #[arg(long)]
        pid: Option<u32>,
    },

    /// Free every resource held by an owner
    Free {
        #[arg(long)]
        owner: String,
    },

    /// Show the reservation ledger
    Ledger {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Remove ledger entries of processes that no longer exist
    ReclaimStale,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = match load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            process::exit(EXIT_CONFIG);
        }
    };

    let code = match cli.command {
        Commands::Verify { trial } => run_verify(&config, &trial),
        Commands::Manifest { trial } => run_manifest(&config, &trial),
        Commands::Run {
            trial,
            runs,
            filter,
            junit,
            unpack,
            interpreter,
        } => run_trial(&config, &trial, &runs, &filter, junit.as_deref(), &unpack, interpreter),
        Commands::Reserve {
            owner,
            request,
            modifiers,
            wait,
            pid,
        } => run_reserve(&config, &owner, &request, modifiers.as_deref(), wait, pid),
        Commands::Free { owner } => run_free(&config, &owner),
        Commands::Ledger { json } => run_ledger(&config, json),
        Commands::ReclaimStale => run_reclaim_stale(&config),
    };
    process::exit(code);
}

fn load_config(explicit: Option<&Path>) -> Result<LabConfig, lab_broker::ConfigError> {
    let path = EffectiveConfig::resolve_path(explicit);
    let effective = EffectiveConfig::build(path.as_deref(), env_overrides(|key| std::env::var(key).ok()))?;
    effective.lab_config()
}

/// An existing directory is used as is, anything else is looked up in trials_dir
fn trial_path(config: &LabConfig, trial: &Path) -> PathBuf {
    if trial.is_dir() {
        trial.to_path_buf()
    } else {
        config.trials_dir.join(trial)
    }
}

fn open_pool(config: &LabConfig) -> Result<ResourcePool, i32> {
    ResourcePool::open(config).map_err(|e| {
        eprintln!("Error opening resource pool: {}", e);
        pool_exit_code(&e)
    })
}

#[cfg(unix)]
fn parent_pid() -> Option<u32> {
    u32::try_from(nix::unistd::getppid().as_raw()).ok()
}

#[cfg(not(unix))]
fn parent_pid() -> Option<u32> {
    None
}

fn pool_exit_code(err: &PoolError) -> i32 {
    match err {
        PoolError::NotSolvable(_) => EXIT_NOT_SOLVABLE,
        PoolError::Lock(_) | PoolError::Ledger(_) | PoolError::ReservationConflict { .. } | PoolError::Io { .. } => {
            EXIT_LEDGER
        }
        _ => EXIT_CONFIG,
    }
}

fn trial_exit_code(err: &TrialError) -> i32 {
    match err {
        TrialError::NotFound(_) => EXIT_CONFIG,
        _ => EXIT_TRIAL,
    }
}

fn run_verify(config: &LabConfig, trial: &Path) -> i32 {
    let dir = trial_path(config, trial);
    let mut trial = match Trial::open(&dir) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error: {}", e);
            return trial_exit_code(&e);
        }
    };
    match trial.verify() {
        Ok(()) => {
            println!("{}: {} files OK", trial.name(), trial.manifest().len());
            EXIT_OK
        }
        Err(e) => {
            eprintln!("{}: {}", trial.name(), e);
            trial_exit_code(&e)
        }
    }
}

fn run_manifest(config: &LabConfig, trial: &Path) -> i32 {
    let dir = trial_path(config, trial);
    if !dir.is_dir() {
        eprintln!("Error: trial directory not found: {}", dir.display());
        return EXIT_CONFIG;
    }
    match Trial::write_manifest(&dir) {
        Ok(manifest) => {
            println!("{}: wrote {} entries", dir.display(), manifest.len());
            EXIT_OK
        }
        Err(e) => {
            eprintln!("Error writing manifest: {}", e);
            EXIT_TRIAL
        }
    }
}

fn run_trial(
    config: &LabConfig,
    trial: &Path,
    references: &[String],
    filter: &[String],
    junit: Option<&Path>,
    unpack: &[String],
    interpreter: Option<PathBuf>,
) -> i32 {
    let selection = match TestSelection::from_patterns(filter) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: invalid filter: {}", e);
            return EXIT_CONFIG;
        }
    };

    let dir = trial_path(config, trial);
    let mut trial = match Trial::open(&dir).and_then(|mut t| t.verify().map(|()| t)) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error: trial {}: {}", dir.display(), e);
            return trial_exit_code(&e);
        }
    };
    for package in unpack {
        if let Err(e) = trial.unpack(package) {
            eprintln!("Error: {}", e);
            return trial_exit_code(&e);
        }
    }
    let run_dir = match trial.new_run_dir() {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Error: {}", e);
            return trial_exit_code(&e);
        }
    };

    let pool = match open_pool(config) {
        Ok(p) => p,
        Err(code) => return code,
    };

    let handler = SignalHandler::new();
    if let Err(e) = handler.install() {
        eprintln!("Warning: failed to install signal handler: {}", e);
    }
    let cancel = handler.cancellation();

    let launcher = CommandLauncher {
        interpreter,
        ..CommandLauncher::default()
    };
    let drivers = DriverRegistry::default();
    let retry = RetryPolicy::from_config(config);

    let mut fatal = None;
    for reference in references {
        if cancel.is_cancelled() {
            break;
        }
        let mut suite_run = match load_run(&config.suites_dir, &config.scenarios_dir, reference) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("Error: {}", e);
                return EXIT_CONFIG;
            }
        };
        let ctx = RunContext {
            pool: &pool,
            launcher: &launcher,
            drivers: &drivers,
            selection: &selection,
            retry: &retry,
            test_timeout: config.test_timeout(),
            cancel: &cancel,
            output_dir: &run_dir,
        };
        match suite_run.run(&ctx) {
            Ok(status) => info!(run = %suite_run.name, %status, "suite run done"),
            Err(e) => {
                error!(run = %suite_run.name, error = %e, "suite run aborted");
                eprintln!("Error: {}", e);
                fatal = Some(e);
                trial.add_suite_run(suite_run);
                break;
            }
        }
        trial.add_suite_run(suite_run);
    }

    let summary = TrialSummary::from_runs(trial.name(), trial.suite_runs());
    if let Err(e) = summary.write_to_file(&run_dir.join(SUMMARY_FILE)) {
        eprintln!("Warning: failed to write summary: {}", e);
    }
    if let Some(path) = junit {
        if let Err(e) = write_junit(path, trial.name(), trial.suite_runs()) {
            eprintln!("Warning: failed to write {}: {}", path.display(), e);
        }
    }
    print!("{}", summary.to_text());

    if cancel.is_cancelled() {
        return EXIT_CODE_CANCELLED;
    }
    match fatal {
        Some(SuiteError::Pool(e)) => pool_exit_code(&e),
        Some(_) => EXIT_CONFIG,
        None if trial.status() == TestStatus::Fail => EXIT_SUITE_FAILED,
        None => EXIT_OK,
    }
}

/// TOML unless the file ends in `.json`
fn load_tree(path: &Path) -> Result<Value, String> {
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if is_json {
        let text = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
        serde_json::from_str(&text).map_err(|e| format!("{}: {}", path.display(), e))
    } else {
        load_toml_file(path).map(|(value, _)| value).map_err(|e| e.to_string())
    }
}

fn run_reserve(
    config: &LabConfig,
    owner: &str,
    request: &Path,
    modifiers: Option<&Path>,
    wait: bool,
    pid: Option<u32>,
) -> i32 {
    let wants = match load_tree(request) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Error reading request: {}", e);
            return EXIT_CONFIG;
        }
    };
    let modifiers = match modifiers.map(load_tree).transpose() {
        Ok(v) => v.unwrap_or(Value::Null),
        Err(e) => {
            eprintln!("Error reading modifiers: {}", e);
            return EXIT_CONFIG;
        }
    };

    let pool = match open_pool(config) {
        Ok(p) => p,
        Err(code) => return code,
    };
    // This process exits right away, so the entry must name a longer-lived holder
    let pool = match pid.or_else(parent_pid) {
        Some(holder) => pool.with_holder_pid(holder),
        None => pool,
    };
    let policy = if wait {
        RetryPolicy::from_config(config)
    } else {
        RetryPolicy::once()
    };

    match pool.reserve_with_retry(owner, &wants, &modifiers, &policy, || false) {
        Ok(reservation) => {
            match serde_json::to_string_pretty(&reservation.to_tree()) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("Warning: cannot render reservation: {}", e),
            }
            EXIT_OK
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            pool_exit_code(&e)
        }
    }
}

fn run_free(config: &LabConfig, owner: &str) -> i32 {
    let pool = match open_pool(config) {
        Ok(p) => p,
        Err(code) => return code,
    };
    match pool.free_owner(owner) {
        Ok(count) => {
            println!("freed {} item(s) of {}", count, owner);
            EXIT_OK
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            pool_exit_code(&e)
        }
    }
}

fn run_ledger(config: &LabConfig, json: bool) -> i32 {
    let pool = match open_pool(config) {
        Ok(p) => p,
        Err(code) => return code,
    };
    let ledger = match pool.reserved() {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Error: {}", e);
            return pool_exit_code(&e);
        }
    };

    if json {
        match serde_json::to_string_pretty(&ledger) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: {}", e);
                return EXIT_LEDGER;
            }
        }
        return EXIT_OK;
    }

    if ledger.is_empty() {
        println!("no reservations");
        return EXIT_OK;
    }
    println!("{:<12} {:>5}  {:<36} {:>8}  RESERVED AT", "KIND", "INDEX", "OWNER", "PID");
    for (kind, entry) in ledger.iter() {
        println!(
            "{:<12} {:>5}  {:<36} {:>8}  {}",
            kind.as_str(),
            entry.index,
            entry.owner,
            entry.pid,
            entry.reserved_at.to_rfc3339()
        );
    }
    EXIT_OK
}

fn run_reclaim_stale(config: &LabConfig) -> i32 {
    let pool = match open_pool(config) {
        Ok(p) => p,
        Err(code) => return code,
    };
    match pool.reclaim_stale() {
        Ok(reclaimed) => {
            for entry in &reclaimed {
                println!(
                    "reclaimed {}[{}] from {} (pid {})",
                    entry.kind, entry.index, entry.owner, entry.pid
                );
            }
            println!("{} stale item(s) reclaimed", reclaimed.len());
            EXIT_OK
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            pool_exit_code(&e)
        }
    }
}
