//! Persistent reservation ledger
//!
//! `<state_dir>/reserved_resources.json` records which owner holds which
//! catalog item. It is only read and written under `LedgerLock`.

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::catalog::Catalog;
use crate::kind::ResourceKind;

pub const LEDGER_FILENAME: &str = "reserved_resources.json";

pub const SCHEMA_VERSION: u32 = 1;

pub const SCHEMA_ID: &str = "lab-broker/ledger@1";

/// Ledger storage errors
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("ledger {} is not valid: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("ledger conflict on {kind}[{index}]: {reason}")]
    Conflict {
        kind: ResourceKind,
        index: usize,
        reason: String,
    },
}

/// One reserved catalog item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub owner: String,
    pub index: usize,
    /// Digest of the catalog item at reservation time
    pub item_sha256: String,
    /// Process holding the reservation
    pub pid: u32,
    pub reserved_at: DateTime<Utc>,
    /// Catalog attributes, for humans reading the file
    pub item: Value,
}

/// Reserved items by kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    pub schema_version: u32,
    pub schema_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reserved: BTreeMap<ResourceKind, Vec<LedgerEntry>>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            updated_at: None,
            reserved: BTreeMap::new(),
        }
    }
}

impl Ledger {
    pub fn path(state_dir: &Path) -> PathBuf {
        state_dir.join(LEDGER_FILENAME)
    }

    /// Read the ledger; a missing or empty file is an empty ledger.
    pub fn load(state_dir: &Path) -> Result<Self, LedgerError> {
        let path = Self::path(state_dir);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => return Err(LedgerError::Io { path, source }),
        };
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(&contents).map_err(|source| LedgerError::Json { path, source })
    }

    /// Write the ledger in place and sync it to disk.
    pub fn store(&mut self, state_dir: &Path) -> Result<(), LedgerError> {
        let path = Self::path(state_dir);
        self.reserved.retain(|_, entries| !entries.is_empty());
        self.updated_at = Some(Utc::now());

        let json = serde_json::to_vec_pretty(self).map_err(|source| LedgerError::Json {
            path: path.clone(),
            source,
        })?;

        let write = || -> io::Result<()> {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?;
            file.write_all(&json)?;
            file.write_all(b"\n")?;
            file.flush()?;
            file.sync_all()
        };
        write().map_err(|source| LedgerError::Io {
            path: path.clone(),
            source,
        })
    }

    /// Check every entry against the catalog.
    ///
    /// Fails on an out-of-range index, a digest that no longer matches the
    /// catalog item, or an item recorded twice.
    pub fn verify(&self, catalog: &Catalog) -> Result<(), LedgerError> {
        for (kind, entries) in &self.reserved {
            let mut seen = HashSet::new();
            for entry in entries {
                let conflict = |reason: String| LedgerError::Conflict {
                    kind: *kind,
                    index: entry.index,
                    reason,
                };
                let item = catalog.get(*kind, entry.index).ok_or_else(|| {
                    conflict(format!(
                        "index out of range, catalog has {} {} items",
                        catalog.items(*kind).len(),
                        kind
                    ))
                })?;
                if item.sha256 != entry.item_sha256 {
                    return Err(conflict(format!(
                        "catalog item changed since it was reserved by '{}'",
                        entry.owner
                    )));
                }
                if !seen.insert(entry.index) {
                    return Err(conflict("reserved more than once".to_string()));
                }
            }
        }
        Ok(())
    }

    pub fn entries(&self, kind: ResourceKind) -> &[LedgerEntry] {
        self.reserved.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every entry with its kind, in kind then ledger order
    pub fn iter(&self) -> impl Iterator<Item = (ResourceKind, &LedgerEntry)> {
        self.reserved
            .iter()
            .flat_map(|(kind, entries)| entries.iter().map(move |e| (*kind, e)))
    }

    pub fn reserved_indices(&self, kind: ResourceKind) -> HashSet<usize> {
        self.entries(kind).iter().map(|e| e.index).collect()
    }

    pub fn owner_of(&self, kind: ResourceKind, index: usize) -> Option<&str> {
        self.entries(kind)
            .iter()
            .find(|e| e.index == index)
            .map(|e| e.owner.as_str())
    }

    /// Add an entry; the item must not be reserved yet.
    pub fn insert(&mut self, kind: ResourceKind, entry: LedgerEntry) -> Result<(), LedgerError> {
        if let Some(owner) = self.owner_of(kind, entry.index) {
            return Err(LedgerError::Conflict {
                kind,
                index: entry.index,
                reason: format!("already reserved by '{}'", owner),
            });
        }
        self.reserved.entry(kind).or_default().push(entry);
        Ok(())
    }

    /// Remove an item if `owner` holds it
    pub fn remove(&mut self, owner: &str, kind: ResourceKind, index: usize) -> bool {
        let Some(entries) = self.reserved.get_mut(&kind) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| !(e.index == index && e.owner == owner));
        before != entries.len()
    }

    /// Remove every item held by `owner`, returning how many were removed
    pub fn remove_owner(&mut self, owner: &str) -> usize {
        let mut removed = 0;
        for entries in self.reserved.values_mut() {
            let before = entries.len();
            entries.retain(|e| e.owner != owner);
            removed += before - entries.len();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.reserved.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::catalog::item_digest;
    use serde_json::json;
    use tempfile::TempDir;

    fn catalog() -> Catalog {
        Catalog::from_value(&json!({"modem": [{"label": "a"}, {"label": "b"}]})).unwrap()
    }

    fn entry(owner: &str, index: usize, attrs: Value) -> LedgerEntry {
        LedgerEntry {
            owner: owner.to_string(),
            index,
            item_sha256: item_digest(&attrs).unwrap(),
            pid: 1,
            reserved_at: Utc::now(),
            item: attrs,
        }
    }

    #[test]
    fn test_missing_and_empty_file_load_as_empty() {
        let temp = TempDir::new().unwrap();
        assert!(Ledger::load(temp.path()).unwrap().is_empty());
        fs::write(Ledger::path(temp.path()), "  \n").unwrap();
        assert!(Ledger::load(temp.path()).unwrap().is_empty());
    }

    #[test]
    fn test_store_then_load() {
        let temp = TempDir::new().unwrap();
        let mut ledger = Ledger::default();
        ledger
            .insert(ResourceKind::Modem, entry("run-1", 1, json!({"label": "b"})))
            .unwrap();
        ledger.store(temp.path()).unwrap();

        let loaded = Ledger::load(temp.path()).unwrap();
        assert_eq!(loaded.owner_of(ResourceKind::Modem, 1), Some("run-1"));
        assert!(loaded.updated_at.is_some());
        loaded.verify(&catalog()).unwrap();
    }

    #[test]
    fn test_insert_rejects_double_reservation() {
        let mut ledger = Ledger::default();
        ledger
            .insert(ResourceKind::Modem, entry("a", 0, json!({"label": "a"})))
            .unwrap();
        let err = ledger
            .insert(ResourceKind::Modem, entry("b", 0, json!({"label": "a"})))
            .unwrap_err();
        assert!(err.to_string().contains("already reserved by 'a'"));
    }

    #[test]
    fn test_verify_detects_changed_item() {
        let mut ledger = Ledger::default();
        ledger
            .insert(ResourceKind::Modem, entry("a", 0, json!({"label": "renamed"})))
            .unwrap();
        assert!(matches!(
            ledger.verify(&catalog()),
            Err(LedgerError::Conflict { index: 0, .. })
        ));
    }

    #[test]
    fn test_verify_detects_out_of_range_and_duplicates() {
        let mut ledger = Ledger::default();
        ledger
            .reserved
            .insert(ResourceKind::Modem, vec![entry("a", 7, json!({"label": "a"}))]);
        assert!(ledger.verify(&catalog()).is_err());

        let dup = entry("a", 0, json!({"label": "a"}));
        ledger
            .reserved
            .insert(ResourceKind::Modem, vec![dup.clone(), dup]);
        let err = ledger.verify(&catalog()).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_remove_only_for_owner() {
        let mut ledger = Ledger::default();
        ledger
            .insert(ResourceKind::Modem, entry("a", 0, json!({"label": "a"})))
            .unwrap();
        ledger
            .insert(ResourceKind::Modem, entry("b", 1, json!({"label": "b"})))
            .unwrap();

        assert!(!ledger.remove("b", ResourceKind::Modem, 0));
        assert!(ledger.remove("a", ResourceKind::Modem, 0));
        assert!(!ledger.remove("a", ResourceKind::Modem, 0));
        assert_eq!(ledger.remove_owner("b"), 1);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_store_drops_empty_kinds() {
        let temp = TempDir::new().unwrap();
        let mut ledger = Ledger::default();
        ledger.reserved.insert(ResourceKind::Bts, Vec::new());
        ledger.store(temp.path()).unwrap();
        let raw = fs::read_to_string(Ledger::path(temp.path())).unwrap();
        assert!(!raw.contains("bts"));
    }
}
