//! Flattened key-path schemas.
//!
//! A schema maps dotted key paths to leaf value types. Sequence elements are
//! addressed with `[]`, so `bts[].trx_list[].nominal_power` names the power of
//! every TRX of every BTS entry.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::child_path;

/// Type of a schema leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// Any string
    Str,
    /// Signed integer (number or numeric string)
    Int,
    /// Unsigned integer (number or numeric string)
    UInt,
    /// Boolean, or one of "true"/"false"/"yes"/"no"/"1"/"0"
    Bool,
    /// Dotted IPv4 address
    Ipv4,
    /// Colon separated 6-byte hardware address
    HwAddr,
    /// Non-empty string of decimal digits (IMSI, MSISDN)
    Digits,
    /// Even-length hex string (keys)
    HexStr,
    /// Positive request count
    Times,
}

impl ValueType {
    /// Check a scalar against this type, returning the reason on failure.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        let ok = match self {
            ValueType::Str => value.is_string(),
            ValueType::Int => match value {
                Value::Number(n) => n.is_i64() || n.is_u64(),
                Value::String(s) => s.parse::<i64>().is_ok(),
                _ => false,
            },
            ValueType::UInt => match value {
                Value::Number(n) => n.is_u64(),
                Value::String(s) => s.parse::<u64>().is_ok(),
                _ => false,
            },
            ValueType::Bool => match value {
                Value::Bool(_) => true,
                Value::String(s) => matches!(
                    s.to_ascii_lowercase().as_str(),
                    "true" | "false" | "yes" | "no" | "1" | "0"
                ),
                _ => false,
            },
            ValueType::Ipv4 => value
                .as_str()
                .map(|s| s.parse::<Ipv4Addr>().is_ok())
                .unwrap_or(false),
            ValueType::HwAddr => value.as_str().map(is_hw_addr).unwrap_or(false),
            ValueType::Digits => value
                .as_str()
                .map(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
                .unwrap_or(false),
            ValueType::HexStr => value
                .as_str()
                .map(|s| !s.is_empty() && s.len() % 2 == 0 && s.bytes().all(|b| b.is_ascii_hexdigit()))
                .unwrap_or(false),
            ValueType::Times => match value {
                Value::Number(n) => n.as_u64().map(|n| n > 0).unwrap_or(false),
                Value::String(s) => s.parse::<u64>().map(|n| n > 0).unwrap_or(false),
                _ => false,
            },
        };

        if ok {
            Ok(())
        } else {
            Err(format!("expected {:?}, got {}", self, value))
        }
    }
}

fn is_hw_addr(s: &str) -> bool {
    let parts: Vec<&str> = s.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Schema validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("unknown key '{path}'")]
    UnknownKey { path: String },

    #[error("invalid value at '{path}': {reason}")]
    InvalidValue { path: String, reason: String },
}

/// A set of typed key paths
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    entries: BTreeMap<String, ValueType>,
}

impl Schema {
    /// Create an empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a typed leaf path
    pub fn with(mut self, path: impl Into<String>, value_type: ValueType) -> Self {
        self.entries.insert(path.into(), value_type);
        self
    }

    /// Add every entry of `other` under `prefix` (`prefix.path`)
    pub fn with_nested(mut self, prefix: &str, other: &Schema) -> Self {
        for (path, value_type) in &other.entries {
            self.entries.insert(child_path(prefix, path), *value_type);
        }
        self
    }

    /// Look up the type of a flattened path
    pub fn get(&self, path: &str) -> Option<ValueType> {
        self.entries.get(path).copied()
    }

    /// Number of leaf paths
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the schema has no leaf paths
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validate a tree against this schema.
    ///
    /// Every scalar leaf must sit at a declared path and carry a value of the
    /// declared type. Empty mappings and sequences always validate.
    pub fn validate(&self, value: &Value) -> Result<(), SchemaError> {
        self.validate_at(value, "")
    }

    fn validate_at(&self, value: &Value, path: &str) -> Result<(), SchemaError> {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    self.validate_at(child, &child_path(path, key))?;
                }
                Ok(())
            }
            Value::Array(items) => {
                let element_path = format!("{}[]", path);
                for item in items {
                    self.validate_at(item, &element_path)?;
                }
                Ok(())
            }
            scalar => match self.entries.get(path) {
                None => Err(SchemaError::UnknownKey {
                    path: path.to_string(),
                }),
                Some(value_type) => value_type.check(scalar).map_err(|reason| {
                    SchemaError::InvalidValue {
                        path: path.to_string(),
                        reason,
                    }
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bts_schema() -> Schema {
        let trx = Schema::new().with("nominal_power", ValueType::UInt);
        let bts = Schema::new()
            .with("label", ValueType::Str)
            .with("addr", ValueType::Ipv4)
            .with("ciphers[]", ValueType::Str)
            .with_nested("trx_list[]", &trx);
        Schema::new().with_nested("bts[]", &bts)
    }

    #[test]
    fn test_valid_tree() {
        let tree = json!({"bts": [{
            "label": "sysmo",
            "addr": "10.42.42.114",
            "ciphers": ["a5_0"],
            "trx_list": [{"nominal_power": 23}]
        }]});
        assert!(bts_schema().validate(&tree).is_ok());
    }

    #[test]
    fn test_unknown_key() {
        let tree = json!({"bts": [{"colour": "red"}]});
        assert_eq!(
            bts_schema().validate(&tree),
            Err(SchemaError::UnknownKey {
                path: "bts[].colour".to_string()
            })
        );
    }

    #[test]
    fn test_invalid_leaf_type() {
        let tree = json!({"bts": [{"addr": "10.42.42"}]});
        assert!(matches!(
            bts_schema().validate(&tree),
            Err(SchemaError::InvalidValue { ref path, .. }) if path == "bts[].addr"
        ));

        let tree = json!({"bts": [{"trx_list": [{"nominal_power": -3}]}]});
        assert!(bts_schema().validate(&tree).is_err());
    }

    #[test]
    fn test_value_types() {
        assert!(ValueType::HwAddr.check(&json!("00:02:95:00:41:b3")).is_ok());
        assert!(ValueType::HwAddr.check(&json!("00:02:95")).is_err());
        assert!(ValueType::Digits.check(&json!("901700000015252")).is_ok());
        assert!(ValueType::Digits.check(&json!("90170x")).is_err());
        assert!(ValueType::HexStr.check(&json!("d620616df8bc5fc0")).is_ok());
        assert!(ValueType::HexStr.check(&json!("abc")).is_err());
        assert!(ValueType::Bool.check(&json!("yes")).is_ok());
        assert!(ValueType::Times.check(&json!(0)).is_err());
        assert!(ValueType::Int.check(&json!("-4")).is_ok());
    }
}
