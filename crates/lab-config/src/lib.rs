//! Structural operations over lab configuration trees.
//!
//! Configuration, resource catalogs and resource requests are all handled as
//! `serde_json::Value` trees of mappings, sequences and scalars. This crate
//! provides the operations the rest of the lab tooling composes:
//!
//! - [`combine`]: fill a tree with defaults from another (left side wins)
//! - [`overlay`]: the reverse precedence (right side wins)
//! - [`item_matches`]: does a candidate satisfy a constraint tree
//! - [`count_times`] and [`expand_times`]: read or unroll `times: N` request counts
//! - [`Schema`]: flattened key-path type validation

mod matching;
mod merge;
mod schema;
mod times;

pub use matching::{item_matches, item_matches_ignoring};
pub use merge::{combine, overlay, MergeError};
pub use schema::{Schema, SchemaError, ValueType};
pub use times::{count_times, expand_times, CountedRequest, TIMES_KEY};

use serde_json::Value;

/// Shape of a value, as reported in merge errors.
pub(crate) fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

/// Element kind shared by all members of a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ElementKind {
    Structured(&'static str),
    Scalar(&'static str),
}

impl ElementKind {
    fn of(value: &Value) -> Self {
        match value {
            Value::Array(_) | Value::Object(_) => ElementKind::Structured(shape_name(value)),
            _ => ElementKind::Scalar(shape_name(value)),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ElementKind::Structured(n) | ElementKind::Scalar(n) => n,
        }
    }
}

/// Determine the common element kind of a run of sequence elements.
///
/// Returns `Ok(None)` for no elements, and the first pair of disagreeing
/// kinds as `Err((first, other))`.
pub(crate) fn common_element_kind<'a>(
    elements: impl IntoIterator<Item = &'a Value>,
) -> Result<Option<ElementKind>, (&'static str, &'static str)> {
    let mut kind: Option<ElementKind> = None;
    for element in elements {
        let this = ElementKind::of(element);
        match kind {
            None => kind = Some(this),
            Some(k) if k == this => {}
            Some(k) => return Err((k.name(), this.name())),
        }
    }
    Ok(kind)
}

/// Append a mapping key to a dotted path.
pub(crate) fn child_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}
