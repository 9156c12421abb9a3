//! Suites, scenarios and suite runs
//!
//! A run reference `suite:scenario1+scenario2` names a suite directory and
//! the scenarios layered onto it. `SuiteRun::run` composes them, reserves the
//! effective request and executes the tests one after another.

mod compose;
mod definition;
mod launcher;
mod run;
mod scenario;
mod select;

pub use compose::{compose, EffectiveRequest, RequestOrigin, RequestSource};
pub use definition::{SuiteDefinition, TestSpec, SUITE_FILE};
pub use launcher::{
    CommandLauncher, LaunchContext, LaunchError, LaunchOutcome, LaunchStatus, TestLauncher,
    CONFIG_ENV, KPI_FILE, RESERVATION_ENV, RUN_DIR_ENV,
};
pub use run::{run_name, RunContext, SuiteRun};
pub use scenario::{Scenario, ScenarioError};
pub use select::TestSelection;

use std::io;
use std::path::{Path, PathBuf};

use lab_config::{MergeError, SchemaError};

use crate::config::SourceError;
use crate::pool::PoolError;
use crate::state::TestStateError;

/// Suite errors
#[derive(Debug, thiserror::Error)]
pub enum SuiteError {
    #[error("invalid suite name '{0}'")]
    InvalidName(String),

    #[error("invalid run reference '{0}', expected suite[:scenario+scenario]")]
    InvalidReference(String),

    #[error("suite '{name}' not found: {} is missing", path.display())]
    NotFound { name: String, path: PathBuf },

    #[error(transparent)]
    Source(SourceError),

    #[error("suite '{suite}': {source}")]
    Schema {
        suite: String,
        #[source]
        source: SchemaError,
    },

    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    #[error("cannot compose suite and scenarios: {0}")]
    Merge(#[from] MergeError),

    #[error("invalid test filter: {0}")]
    Filter(#[from] globset::Error),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    State(#[from] TestStateError),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Split `suite:sc1+sc2` into the suite name and scenario references
pub fn parse_run_reference(reference: &str) -> Result<(String, Vec<String>), SuiteError> {
    let invalid = || SuiteError::InvalidReference(reference.to_string());
    let (suite, scenarios) = match reference.split_once(':') {
        None => (reference, Vec::new()),
        Some((suite, rest)) => {
            let scenarios: Vec<String> = rest.split('+').map(str::to_string).collect();
            if scenarios.iter().any(String::is_empty) {
                return Err(invalid());
            }
            (suite, scenarios)
        }
    };
    if suite.is_empty() {
        return Err(invalid());
    }
    Ok((suite.to_string(), scenarios))
}

/// Load the suite and scenarios of a run reference and compose them
pub fn load_run(suites_dir: &Path, scenarios_dir: &Path, reference: &str) -> Result<SuiteRun, SuiteError> {
    let (suite, scenario_refs) = parse_run_reference(reference)?;
    let definition = SuiteDefinition::load(suites_dir, &suite)?;
    let scenarios = scenario_refs
        .iter()
        .map(|r| Scenario::load(scenarios_dir, r))
        .collect::<Result<Vec<_>, _>>()?;
    SuiteRun::new(&definition, &scenarios)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_reference() {
        assert_eq!(parse_run_reference("sms").unwrap(), ("sms".to_string(), vec![]));
        assert_eq!(
            parse_run_reference("sms:trx+band@GSM-900,2").unwrap(),
            (
                "sms".to_string(),
                vec!["trx".to_string(), "band@GSM-900,2".to_string()]
            )
        );
        assert!(parse_run_reference(":trx").is_err());
        assert!(parse_run_reference("sms:trx++voice").is_err());
        assert!(parse_run_reference("sms:").is_err());
    }
}
