//! Structural subset matching.
//!
//! `item_matches(superset, subset)` answers whether a candidate tree satisfies
//! a constraint tree. Only the keys named by the subset are checked.

use serde_json::Value;

use crate::{common_element_kind, ElementKind, TIMES_KEY};

/// Check whether `superset` satisfies every constraint in `subset`.
///
/// - Scalars compare by equality
/// - Scalar sequences are capability sets: each subset element must occur in
///   the superset, order and duplicates are irrelevant
/// - Structured sequences are ordered: the subset may not be longer than the
///   superset and each position matches recursively, so an empty record is a
///   wildcard
/// - The request count key `times` is ignored
pub fn item_matches(superset: &Value, subset: &Value) -> bool {
    item_matches_ignoring(superset, subset, &[TIMES_KEY])
}

/// Same as [`item_matches`], skipping every mapping key listed in `ignore_keys`.
pub fn item_matches_ignoring(superset: &Value, subset: &Value, ignore_keys: &[&str]) -> bool {
    match subset {
        Value::Object(wanted) => {
            let Value::Object(have) = superset else {
                return false;
            };
            wanted
                .iter()
                .filter(|(key, _)| !ignore_keys.contains(&key.as_str()))
                .all(|(key, wanted_value)| {
                    let have_value = have.get(key).unwrap_or(&Value::Null);
                    item_matches_ignoring(have_value, wanted_value, ignore_keys)
                })
        }
        Value::Array(wanted) => {
            let Value::Array(have) = superset else {
                return false;
            };
            match common_element_kind(wanted.iter().chain(have.iter())) {
                Err(_) => false,
                Ok(None) => true,
                Ok(Some(ElementKind::Structured(_))) => {
                    wanted.len() <= have.len()
                        && wanted
                            .iter()
                            .zip(have.iter())
                            .all(|(w, h)| item_matches_ignoring(h, w, ignore_keys))
                }
                Ok(Some(ElementKind::Scalar(_))) => wanted.iter().all(|w| have.contains(w)),
            }
        }
        scalar => superset == scalar,
    }
}
