//! Resource catalog
//!
//! The catalog is a TOML file with one array of tables per kind:
//!
//! ```toml
//! [[bts]]
//! label = "sysmoBTS 1002"
//! type = "osmo-bts-sysmo"
//! addr = "10.42.42.114"
//!
//! [[modem]]
//! label = "m7801"
//! imsi = "901700000007801"
//! ```
//!
//! An item's identity is its kind plus its position in that kind's list, so
//! reordering the file changes identities. The ledger pins each reserved item
//! to its content digest to catch that.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use crate::config::{load_toml_file, parse_toml_str, SourceError};
use crate::kind::{catalog_schema, ResourceKind, UnknownKind};

/// Catalog loading errors
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("cannot parse catalog: {0}")]
    Parse(String),

    #[error("catalog must be a mapping of kind to item list")]
    NotAMapping,

    #[error(transparent)]
    UnknownKind(#[from] UnknownKind),

    #[error("invalid catalog: {0}")]
    Schema(#[from] lab_config::SchemaError),

    #[error("cannot digest {kind}[{index}]: {reason}")]
    Digest {
        kind: ResourceKind,
        index: usize,
        reason: String,
    },
}

/// One catalog entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceItem {
    pub kind: ResourceKind,
    pub index: usize,
    pub attrs: Value,
    /// SHA-256 of the JCS-canonical attributes
    pub sha256: String,
}

/// Digest of an item's attributes, independent of key order
pub fn item_digest(attrs: &Value) -> Result<String, String> {
    let canonical = serde_json_canonicalizer::to_vec(attrs).map_err(|e| e.to_string())?;
    Ok(crate::config::sha256_hex(&canonical))
}

/// Validated, immutable resource catalog
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    items: BTreeMap<ResourceKind, Vec<ResourceItem>>,
}

impl Catalog {
    /// Build from a `{kind: [item, ...]}` tree
    pub fn from_value(tree: &Value) -> Result<Self, CatalogError> {
        let kinds = match tree {
            Value::Null => return Ok(Self::default()),
            Value::Object(kinds) => kinds,
            _ => return Err(CatalogError::NotAMapping),
        };

        for kind in kinds.keys() {
            kind.parse::<ResourceKind>()?;
        }
        catalog_schema().validate(tree)?;

        let mut items = BTreeMap::new();
        for (name, entries) in kinds {
            let kind: ResourceKind = name.parse()?;
            let entries = entries.as_array().ok_or(CatalogError::NotAMapping)?;
            let mut list = Vec::with_capacity(entries.len());
            for (index, attrs) in entries.iter().enumerate() {
                let sha256 = item_digest(attrs).map_err(|reason| CatalogError::Digest {
                    kind,
                    index,
                    reason,
                })?;
                list.push(ResourceItem {
                    kind,
                    index,
                    attrs: attrs.clone(),
                    sha256,
                });
            }
            items.insert(kind, list);
        }
        Ok(Self { items })
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, CatalogError> {
        let tree = parse_toml_str(contents).map_err(CatalogError::Parse)?;
        Self::from_value(&tree)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let (tree, _digest) = load_toml_file(path)?;
        Self::from_value(&tree)
    }

    /// Items of one kind, in catalog order
    pub fn items(&self, kind: ResourceKind) -> &[ResourceItem] {
        self.items.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get(&self, kind: ResourceKind, index: usize) -> Option<&ResourceItem> {
        self.items(kind).get(index)
    }

    /// Kinds with at least one item
    pub fn kinds(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        self.items
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(kind, _)| *kind)
    }

    /// Total number of items
    pub fn len(&self) -> usize {
        self.items.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Position of an item in a single numbering across kinds
    pub(crate) fn global_index(&self, kind: ResourceKind, index: usize) -> usize {
        let offset: usize = self
            .items
            .range(..kind)
            .map(|(_, list)| list.len())
            .sum();
        offset + index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CATALOG: &str = r#"
        [[ip_address]]
        addr = "10.42.42.2"

        [[ip_address]]
        addr = "10.42.42.3"

        [[modem]]
        label = "m7801"
        imsi = "901700000007801"
        ciphers = ["a5_0", "a5_1"]
    "#;

    #[test]
    fn test_load_from_toml() {
        let catalog = Catalog::from_toml_str(CATALOG).unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.items(ResourceKind::IpAddress).len(), 2);
        assert_eq!(
            catalog.get(ResourceKind::Modem, 0).unwrap().attrs["label"],
            "m7801"
        );
        assert!(catalog.items(ResourceKind::Bts).is_empty());
        assert_eq!(
            catalog.kinds().collect::<Vec<_>>(),
            vec![ResourceKind::IpAddress, ResourceKind::Modem]
        );
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let err = Catalog::from_value(&json!({"attenuator": [{}]})).unwrap_err();
        assert!(matches!(err, CatalogError::UnknownKind(_)));
    }

    #[test]
    fn test_schema_violation_rejected() {
        let err = Catalog::from_value(&json!({"ip_address": [{"addr": "not-an-ip"}]})).unwrap_err();
        assert!(matches!(err, CatalogError::Schema(_)));
    }

    #[test]
    fn test_digest_ignores_key_order() {
        let a = item_digest(&json!({"label": "x", "imsi": "1"})).unwrap();
        let b = item_digest(&json!({"imsi": "1", "label": "x"})).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, item_digest(&json!({"imsi": "2", "label": "x"})).unwrap());
    }

    #[test]
    fn test_global_index_is_unique_across_kinds() {
        let catalog = Catalog::from_toml_str(CATALOG).unwrap();
        let ids = [
            catalog.global_index(ResourceKind::IpAddress, 0),
            catalog.global_index(ResourceKind::IpAddress, 1),
            catalog.global_index(ResourceKind::Modem, 0),
        ];
        assert_eq!(ids, [0, 1, 2]);
    }
}
