//! Request count expansion.

use serde_json::{Map, Value};

use crate::{shape_name, MergeError};

/// Key carrying the number of identical units a request object asks for.
pub const TIMES_KEY: &str = "times";

/// One request object with its `times` count split off.
#[derive(Debug, Clone, PartialEq)]
pub struct CountedRequest {
    /// The request object without its `times` key
    pub constraint: Value,
    pub times: u64,
}

/// Split `{kind: [{times: N, ...}]}` into per-kind counted request objects
/// without unrolling them. Kinds keep their order of appearance.
///
/// Missing `times` means one unit. `times` must be a positive integer or a
/// string of digits naming one.
pub fn count_times(request: &Value) -> Result<Vec<(String, Vec<CountedRequest>)>, MergeError> {
    let kinds = match request {
        Value::Null => return Ok(Vec::new()),
        Value::Object(kinds) => kinds,
        other => {
            return Err(MergeError::TypeMismatch {
                path: String::new(),
                dest: "mapping",
                src: shape_name(other),
            })
        }
    };

    let mut counted = Vec::with_capacity(kinds.len());
    for (kind, items) in kinds {
        let Value::Array(items) = items else {
            return Err(MergeError::TypeMismatch {
                path: kind.clone(),
                dest: "sequence",
                src: shape_name(items),
            });
        };

        let mut objects = Vec::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            let path = format!("{}[{}]", kind, idx);
            let Value::Object(fields) = item else {
                return Err(MergeError::TypeMismatch {
                    path,
                    dest: "mapping",
                    src: shape_name(item),
                });
            };

            let times = match fields.get(TIMES_KEY) {
                None => 1,
                Some(value) => parse_times(value).ok_or_else(|| MergeError::InvalidTimes {
                    path: format!("{}.{}", path, TIMES_KEY),
                    value: value.to_string(),
                })?,
            };

            let mut constraint = fields.clone();
            constraint.remove(TIMES_KEY);
            objects.push(CountedRequest {
                constraint: Value::Object(constraint),
                times,
            });
        }
        counted.push((kind.clone(), objects));
    }

    Ok(counted)
}

/// Expand `{kind: [{times: N, ...}]}` into `{kind: [{...}; N]}`.
///
/// Allocates every unit; callers handling untrusted counts should bound them
/// with [`count_times`] first.
pub fn expand_times(request: &Value) -> Result<Value, MergeError> {
    let mut expanded = Map::new();
    for (kind, objects) in count_times(request)? {
        let mut units = Vec::new();
        for object in objects {
            for _ in 0..object.times {
                units.push(object.constraint.clone());
            }
        }
        expanded.insert(kind, Value::Array(units));
    }
    Ok(Value::Object(expanded))
}

fn parse_times(value: &Value) -> Option<u64> {
    let n = match value {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    (n > 0).then_some(n)
}
