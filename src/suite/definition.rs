//! Suite definitions
//!
//! A suite is a directory `<suites_dir>/<name>/` holding `suite.toml` and the
//! test files. `suite.toml` carries the same `resources` / `modifiers` /
//! `config` sections as a scenario. Tests are every regular file of the
//! directory except `suite.toml` and dot files, in name order.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::scenario::split_sections;
use super::SuiteError;
use crate::config::load_toml_file;
use crate::kind::request_schema;

pub const SUITE_FILE: &str = "suite.toml";

/// A test file of a suite
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSpec {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteDefinition {
    pub name: String,
    pub dir: PathBuf,
    pub tests: Vec<TestSpec>,
    pub resources: Value,
    pub modifiers: Value,
    pub config: Value,
    /// SHA-256 of `suite.toml`
    pub sha256: String,
}

impl SuiteDefinition {
    pub fn load(suites_dir: &Path, name: &str) -> Result<Self, SuiteError> {
        if name.is_empty() || name.contains('/') || name.starts_with('.') {
            return Err(SuiteError::InvalidName(name.to_string()));
        }
        let dir = suites_dir.join(name);
        let suite_file = dir.join(SUITE_FILE);
        if !suite_file.is_file() {
            return Err(SuiteError::NotFound {
                name: name.to_string(),
                path: suite_file,
            });
        }

        let (tree, sha256) = load_toml_file(&suite_file).map_err(SuiteError::Source)?;
        let mut sections = split_sections(tree, name)?;
        let resources = sections.remove("resources").unwrap_or(Value::Null);
        let modifiers = sections.remove("modifiers").unwrap_or(Value::Null);
        let config = sections.remove("config").unwrap_or(Value::Null);
        for section in [&resources, &modifiers] {
            if !section.is_null() {
                request_schema()
                    .validate(section)
                    .map_err(|source| SuiteError::Schema {
                        suite: name.to_string(),
                        source,
                    })?;
            }
        }

        let tests = discover_tests(&dir)?;
        Ok(Self {
            name: name.to_string(),
            dir,
            tests,
            resources,
            modifiers,
            config,
            sha256,
        })
    }
}

fn discover_tests(dir: &Path) -> Result<Vec<TestSpec>, SuiteError> {
    let io_err = |source| SuiteError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut tests = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name == SUITE_FILE || name.starts_with('.') {
            continue;
        }
        if entry.file_type().map_err(io_err)?.is_file() {
            tests.push(TestSpec {
                name,
                path: entry.path(),
            });
        }
    }
    tests.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(tests)
}
