//! TOML sources shared by the config, catalog, suite and scenario loaders.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Errors reading a TOML source
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
}

/// Hex SHA-256 of raw bytes
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Load a TOML file, returning its JSON tree and the digest of its bytes.
pub fn load_toml_file(path: &Path) -> Result<(Value, String), SourceError> {
    let bytes = fs::read(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let digest = sha256_hex(&bytes);

    let contents = String::from_utf8(bytes).map_err(|e| SourceError::Parse {
        path: path.to_path_buf(),
        message: format!("invalid UTF-8: {}", e),
    })?;

    let value = parse_toml_str(&contents).map_err(|message| SourceError::Parse {
        path: path.to_path_buf(),
        message,
    })?;
    Ok((value, digest))
}

/// Parse TOML text into a JSON tree
pub fn parse_toml_str(contents: &str) -> Result<Value, String> {
    let toml_value: toml::Value = toml::from_str(contents).map_err(|e| e.to_string())?;
    Ok(toml_to_json(toml_value))
}

/// Convert a TOML value to a JSON value.
///
/// Datetimes become strings; non-finite floats become null.
pub fn toml_to_json(toml: toml::Value) -> Value {
    match toml {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(arr) => Value::Array(arr.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}
