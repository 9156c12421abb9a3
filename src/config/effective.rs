//! Effective lab configuration with provenance

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lab_config::{combine, MergeError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::defaults::LabDefaults;
use super::source::{load_toml_file, SourceError};

pub const SCHEMA_VERSION: u32 = 1;

pub const SCHEMA_ID: &str = "lab-broker/effective_config@1";

/// Config file looked up in the working directory when `--config` is absent
pub const DEFAULT_CONFIG_FILE: &str = "lab-broker.toml";

/// Environment variable overriding `state_dir`
pub const STATE_DIR_ENV: &str = "LAB_BROKER_STATE_DIR";

/// Origin of a configuration source
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    File,
    Env,
}

/// A contributing config source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 of the raw file bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Typed view of the merged configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LabConfig {
    pub state_dir: PathBuf,
    pub catalog: PathBuf,
    pub suites_dir: PathBuf,
    pub scenarios_dir: PathBuf,
    pub trials_dir: PathBuf,
    pub lock_timeout_secs: u64,
    pub reserve_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub test_timeout_secs: u64,
}

impl LabConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn reserve_timeout(&self) -> Duration {
        Duration::from_secs(self.reserve_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }
}

impl Default for LabConfig {
    fn default() -> Self {
        let d = LabDefaults::default();
        Self {
            state_dir: d.state_dir.into(),
            catalog: d.catalog.into(),
            suites_dir: d.suites_dir.into(),
            scenarios_dir: d.scenarios_dir.into(),
            trials_dir: d.trials_dir.into(),
            lock_timeout_secs: d.lock_timeout_secs,
            reserve_timeout_secs: d.reserve_timeout_secs,
            poll_interval_ms: d.poll_interval_ms,
            test_timeout_secs: d.test_timeout_secs,
        }
    }
}

/// Merged configuration with the sources that produced it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub schema_version: u32,
    pub schema_id: String,
    pub created_at: DateTime<Utc>,

    /// The merged configuration object
    pub config: Value,

    /// Contributing sources, lowest precedence first
    pub sources: Vec<ConfigSource>,
}

/// Environment layer built from a variable lookup.
///
/// Returns `None` when no override is set.
pub fn env_overrides(lookup: impl Fn(&str) -> Option<String>) -> Option<Value> {
    let mut layer = Map::new();
    if let Some(dir) = lookup(STATE_DIR_ENV).filter(|v| !v.is_empty()) {
        layer.insert("state_dir".to_string(), Value::String(dir));
    }
    (!layer.is_empty()).then_some(Value::Object(layer))
}

impl EffectiveConfig {
    /// Pick the config file: the explicit one, else `./lab-broker.toml` if present.
    pub fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
        match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                fallback.exists().then_some(fallback)
            }
        }
    }

    /// Merge defaults, the config file and environment overrides.
    pub fn build(config_file: Option<&Path>, env: Option<Value>) -> Result<Self, ConfigError> {
        let mut layers = vec![LabDefaults::default().to_value()];
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        }];

        if let Some(path) = config_file {
            let (value, digest) = load_toml_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::File,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        if let Some(env) = env {
            layers.push(env);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Env,
                path: None,
                digest: None,
            });
        }

        // Highest layer on the left: fold downwards from the top.
        let mut merged = Value::Object(Map::new());
        for layer in layers.iter().rev() {
            combine(&mut merged, layer)?;
        }

        let effective = Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            config: merged,
            sources,
        };
        effective.lab_config()?;
        Ok(effective)
    }

    /// Typed, validated view of the merged tree
    pub fn lab_config(&self) -> Result<LabConfig, ConfigError> {
        let config: LabConfig = serde_json::from_value(self.config.clone())
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        for (key, value) in [
            ("lock_timeout_secs", config.lock_timeout_secs),
            ("poll_interval_ms", config.poll_interval_ms),
            ("test_timeout_secs", config.test_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Validation(format!("{} must be > 0", key)));
            }
        }
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, json)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("cannot merge configuration layers: {0}")]
    Merge(#[from] MergeError),

    #[error("invalid configuration: {0}")]
    Validation(String),
}
