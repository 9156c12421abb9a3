//! Scenarios: named request and config overlays for a suite run
//!
//! `<scenarios_dir>/<name>.toml` holds up to three sections:
//!
//! ```toml
//! [[resources.bts]]
//! type = "osmo-bts-trx"
//!
//! [[modifiers.bts]]
//! num_trx = 2
//!
//! [config.bsc]
//! net_mcc = "901"
//! ```
//!
//! A parametrized scenario is referenced as `name@p1,p2` and loaded from
//! `name@.toml`; every `${paramN}` in its string values is replaced by the
//! N-th parameter.

use std::path::{Path, PathBuf};

use lab_config::SchemaError;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{load_toml_file, SourceError};
use crate::kind::request_schema;

/// Top-level sections a scenario or suite file may carry
pub(crate) const SECTIONS: [&str; 3] = ["resources", "modifiers", "config"];

const PARAM_PATTERN: &str = r"\$\{param([0-9]+)\}";

/// Scenario loading errors
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("invalid scenario reference '{0}'")]
    InvalidReference(String),

    #[error("scenario '{name}' not found at {}", path.display())]
    NotFound { name: String, path: PathBuf },

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("scenario '{scenario}' uses ${{param{param}}} but only {given} parameters were given")]
    MissingParam {
        scenario: String,
        param: usize,
        given: usize,
    },

    #[error("scenario '{scenario}' has unknown section '{key}'")]
    UnknownSection { scenario: String, key: String },

    #[error("scenario '{scenario}': {source}")]
    Schema {
        scenario: String,
        #[source]
        source: SchemaError,
    },

    #[error("scenario parameter pattern: {0}")]
    Pattern(String),
}

/// A loaded scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Reference as given, parameters included
    pub name: String,
    pub path: PathBuf,
    /// SHA-256 of the file bytes
    pub sha256: String,
    pub resources: Value,
    pub modifiers: Value,
    pub config: Value,
}

/// `name@p1,p2` split into file stem and parameters
fn parse_reference(reference: &str) -> Result<(String, Vec<String>), ScenarioError> {
    let invalid = || ScenarioError::InvalidReference(reference.to_string());
    let (stem, params) = match reference.split_once('@') {
        None => (reference.to_string(), Vec::new()),
        Some((base, params)) => {
            let params: Vec<String> = params.split(',').map(str::to_string).collect();
            (format!("{}@", base), params)
        }
    };
    let base = stem.trim_end_matches('@');
    if base.is_empty() || base.contains('/') || base.contains("..") || base.starts_with('.') {
        return Err(invalid());
    }
    Ok((stem, params))
}

impl Scenario {
    /// Load a scenario by reference from `scenarios_dir`
    pub fn load(scenarios_dir: &Path, reference: &str) -> Result<Self, ScenarioError> {
        let (stem, params) = parse_reference(reference)?;
        let path = scenarios_dir.join(format!("{}.toml", stem));
        if !path.is_file() {
            return Err(ScenarioError::NotFound {
                name: reference.to_string(),
                path,
            });
        }

        let (mut tree, sha256) = load_toml_file(&path)?;
        if !params.is_empty() || stem.ends_with('@') {
            let pattern = Regex::new(PARAM_PATTERN).map_err(|e| ScenarioError::Pattern(e.to_string()))?;
            substitute(&mut tree, &pattern, &params, reference)?;
        }

        let mut sections = split_sections(tree, reference)?;
        let resources = sections.remove("resources").unwrap_or(Value::Null);
        let modifiers = sections.remove("modifiers").unwrap_or(Value::Null);
        let config = sections.remove("config").unwrap_or(Value::Null);

        for section in [&resources, &modifiers] {
            if !section.is_null() {
                request_schema()
                    .validate(section)
                    .map_err(|source| ScenarioError::Schema {
                        scenario: reference.to_string(),
                        source,
                    })?;
            }
        }

        Ok(Self {
            name: reference.to_string(),
            path,
            sha256,
            resources,
            modifiers,
            config,
        })
    }
}

/// Split a suite or scenario tree into its known sections
pub(crate) fn split_sections(tree: Value, owner: &str) -> Result<Map<String, Value>, ScenarioError> {
    let Value::Object(map) = tree else {
        return Ok(Map::new());
    };
    if let Some(key) = map.keys().find(|k| !SECTIONS.contains(&k.as_str())) {
        return Err(ScenarioError::UnknownSection {
            scenario: owner.to_string(),
            key: key.clone(),
        });
    }
    Ok(map)
}

fn substitute(value: &mut Value, pattern: &Regex, params: &[String], scenario: &str) -> Result<(), ScenarioError> {
    match value {
        Value::String(s) => {
            if !pattern.is_match(s) {
                return Ok(());
            }
            let mut missing = None;
            let replaced = pattern.replace_all(s, |caps: &regex_lite::Captures<'_>| {
                let n: usize = caps[1].parse().unwrap_or(0);
                match n.checked_sub(1).and_then(|i| params.get(i)) {
                    Some(param) => param.clone(),
                    None => {
                        missing.get_or_insert(n);
                        String::new()
                    }
                }
            });
            if let Some(param) = missing {
                return Err(ScenarioError::MissingParam {
                    scenario: scenario.to_string(),
                    param,
                    given: params.len(),
                });
            }
            *s = replaced.into_owned();
            Ok(())
        }
        Value::Array(items) => items
            .iter_mut()
            .try_for_each(|item| substitute(item, pattern, params, scenario)),
        Value::Object(map) => map
            .values_mut()
            .try_for_each(|item| substitute(item, pattern, params, scenario)),
        _ => Ok(()),
    }
}
