//! Reservations handed out by the pool

use chrono::{DateTime, Utc};
use lab_config::item_matches;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use super::{PoolError, ResourcePool};
use crate::kind::ResourceKind;

/// Errors picking items out of a reservation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReservationError {
    #[error("no unused {kind} in reservation matches {specifics}")]
    NoMatch { kind: ResourceKind, specifics: Value },
}

/// A reserved item with its effective attributes (catalog item plus modifiers)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservedItem {
    pub kind: ResourceKind,
    pub index: usize,
    pub attrs: Value,
    #[serde(skip)]
    used: bool,
}

impl ReservedItem {
    pub(crate) fn new(kind: ResourceKind, index: usize, attrs: Value) -> Self {
        Self {
            kind,
            index,
            attrs,
            used: false,
        }
    }

    pub fn is_used(&self) -> bool {
        self.used
    }
}

/// Items held by one owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    owner: String,
    reserved_at: DateTime<Utc>,
    items: Vec<ReservedItem>,
}

impl Reservation {
    pub(crate) fn new(owner: impl Into<String>, items: Vec<ReservedItem>) -> Self {
        Self {
            owner: owner.into(),
            reserved_at: Utc::now(),
            items,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn reserved_at(&self) -> DateTime<Utc> {
        self.reserved_at
    }

    /// All items, grouped by kind in request order
    pub fn all_items(&self) -> &[ReservedItem] {
        &self.items
    }

    /// Items of one kind, in request order
    pub fn items(&self, kind: ResourceKind) -> impl Iterator<Item = &ReservedItem> {
        self.items.iter().filter(move |item| item.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Take the first unused item of `kind` matching `specifics`.
    pub fn get(&mut self, kind: ResourceKind, specifics: &Value) -> Result<&ReservedItem, ReservationError> {
        match self
            .items
            .iter_mut()
            .find(|item| item.kind == kind && !item.used && item_matches(&item.attrs, specifics))
        {
            Some(item) => {
                item.used = true;
                Ok(&*item)
            }
            None => Err(ReservationError::NoMatch {
                kind,
                specifics: specifics.clone(),
            }),
        }
    }

    /// Return an item taken with `get`
    pub fn put(&mut self, kind: ResourceKind, index: usize) -> bool {
        match self
            .items
            .iter_mut()
            .find(|item| item.kind == kind && item.index == index && item.used)
        {
            Some(item) => {
                item.used = false;
                true
            }
            None => false,
        }
    }

    pub fn put_all(&mut self) {
        for item in &mut self.items {
            item.used = false;
        }
    }

    /// `{kind: [attrs, ...]}` tree handed to tests
    pub fn to_tree(&self) -> Value {
        let mut tree = Map::new();
        for item in &self.items {
            let list = tree
                .entry(item.kind.as_str().to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(list) = list {
                list.push(item.attrs.clone());
            }
        }
        Value::Object(tree)
    }
}

/// Frees its reservation when dropped
pub struct ReservationGuard<'p> {
    pool: &'p ResourcePool,
    reservation: Reservation,
    released: bool,
}

impl<'p> ReservationGuard<'p> {
    pub fn new(pool: &'p ResourcePool, reservation: Reservation) -> Self {
        Self {
            pool,
            reservation,
            released: false,
        }
    }

    pub fn reservation(&self) -> &Reservation {
        &self.reservation
    }

    pub fn reservation_mut(&mut self) -> &mut Reservation {
        &mut self.reservation
    }

    /// Free now and report the outcome
    pub fn release(mut self) -> Result<usize, PoolError> {
        self.released = true;
        self.pool.free(&self.reservation)
    }
}

impl Drop for ReservationGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.pool.free(&self.reservation) {
            warn!(owner = %self.reservation.owner, error = %e, "failed to free reservation");
        }
    }
}
