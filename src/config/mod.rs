//! Lab configuration
//!
//! Three layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. Config file (`--config`, or `./lab-broker.toml` when present)
//! 3. Environment overrides (`LAB_BROKER_STATE_DIR`)
//!
//! Layers are composed with `lab_config::combine`, the higher layer on the
//! left so that it wins.

mod defaults;
mod effective;
mod source;

pub use defaults::LabDefaults;
pub use effective::{
    env_overrides, ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig, LabConfig,
    DEFAULT_CONFIG_FILE, STATE_DIR_ENV,
};
pub use source::{load_toml_file, parse_toml_str, sha256_hex, toml_to_json, SourceError};
