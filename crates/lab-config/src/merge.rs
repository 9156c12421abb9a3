//! Defaulting merge of configuration trees.
//!
//! Merge semantics for `combine(dest, src)`:
//! - Mappings: recurse by key, keys missing in `dest` are copied from `src`
//! - Scalars: `dest` wins when present, `null` counts as absent
//! - Scalar sequences: treated as preference lists, `src` elements not yet in
//!   `dest` are appended in `src` order
//! - Structured sequences: merged position by position, the result has the
//!   length of the longer side
//! - Mixed element kinds or container/scalar clashes: `TypeMismatch`

use serde_json::{Map, Value};

use crate::{child_path, common_element_kind, shape_name, ElementKind};

/// Errors from merging configuration trees
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    #[error("type mismatch at '{path}': cannot combine {dest} with {src}")]
    TypeMismatch {
        path: String,
        dest: &'static str,
        src: &'static str,
    },

    #[error("invalid 'times' at '{path}': {value}")]
    InvalidTimes { path: String, value: String },
}

/// Fill `dest` with defaults from `src`, keeping `dest`'s values on conflict.
pub fn combine(dest: &mut Value, src: &Value) -> Result<(), MergeError> {
    combine_at(dest, src, "")
}

/// Apply `src` on top of `dest`, with `src`'s values winning on conflict.
pub fn overlay(dest: &mut Value, src: &Value) -> Result<(), MergeError> {
    let mut merged = src.clone();
    combine(&mut merged, dest)?;
    *dest = merged;
    Ok(())
}

fn combine_at(dest: &mut Value, src: &Value, path: &str) -> Result<(), MergeError> {
    if src.is_null() {
        return Ok(());
    }
    if dest.is_null() {
        *dest = src.clone();
        return Ok(());
    }

    let dest_shape = shape_name(dest);
    let clash = is_container(dest) || is_container(src);

    match (dest, src) {
        (Value::Object(dest_map), Value::Object(src_map)) => {
            for (key, src_value) in src_map {
                match dest_map.get_mut(key) {
                    Some(dest_value) => combine_at(dest_value, src_value, &child_path(path, key))?,
                    None => {
                        dest_map.insert(key.clone(), src_value.clone());
                    }
                }
            }
            Ok(())
        }
        (Value::Array(dest_seq), Value::Array(src_seq)) => combine_sequences(dest_seq, src_seq, path),
        (_, src) if clash => Err(MergeError::TypeMismatch {
            path: path.to_string(),
            dest: dest_shape,
            src: shape_name(src),
        }),
        // Both scalars: dest wins
        _ => Ok(()),
    }
}

fn combine_sequences(dest: &mut Vec<Value>, src: &[Value], path: &str) -> Result<(), MergeError> {
    let kind = common_element_kind(dest.iter().chain(src.iter())).map_err(|(first, other)| {
        MergeError::TypeMismatch {
            path: format!("{}[]", path),
            dest: first,
            src: other,
        }
    })?;

    match kind {
        None => Ok(()),
        Some(ElementKind::Structured(shape)) => {
            while dest.len() < src.len() {
                dest.push(empty_like(shape));
            }
            for (idx, src_value) in src.iter().enumerate() {
                combine_at(&mut dest[idx], src_value, &format!("{}[{}]", path, idx))?;
            }
            Ok(())
        }
        Some(ElementKind::Scalar(_)) => {
            for src_value in src {
                if !dest.contains(src_value) {
                    dest.push(src_value.clone());
                }
            }
            Ok(())
        }
    }
}

fn is_container(value: &Value) -> bool {
    value.is_object() || value.is_array()
}

fn empty_like(shape: &str) -> Value {
    if shape == "sequence" {
        Value::Array(Vec::new())
    } else {
        Value::Object(Map::new())
    }
}
