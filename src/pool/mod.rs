//! Resource pool
//!
//! A `ResourcePool` owns a validated `Catalog` and a state directory holding
//! the shared ledger. Every mutation is a locked read-modify-write of the
//! ledger file, so any number of processes (and pools) can share one state
//! directory. The pool never blocks on capacity: `reserve` either succeeds or
//! reports why it cannot, and waiting is left to `reserve_with_retry`.

mod catalog;
mod counter;
mod error;
mod ledger;
mod lock;
mod reservation;

pub use catalog::{item_digest, Catalog, CatalogError, ResourceItem};
pub use error::{Diagnostics, PoolError, RequestDiagnostic};
pub use ledger::{Ledger, LedgerEntry, LedgerError, LEDGER_FILENAME};
pub use lock::{LedgerLock, LockError};
pub use reservation::{Reservation, ReservationError, ReservationGuard, ReservedItem};

use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use lab_config::{count_times, item_matches, overlay, CountedRequest};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::LabConfig;
use crate::kind::{request_schema, ResourceKind};
use crate::solver::{solve, NotSolvable};

pub type PoolResult<T> = Result<T, PoolError>;

/// Pool tuning
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// How long to wait for the ledger lock before giving up
    pub lock_timeout: Duration,
    /// Process recorded as the holder of new reservations, `None` for this
    /// process. Stale detection frees an entry once its holder is gone.
    pub holder_pid: Option<u32>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(30),
            holder_pid: None,
        }
    }
}

impl PoolOptions {
    pub fn from_config(config: &LabConfig) -> Self {
        Self {
            lock_timeout: config.lock_timeout(),
            holder_pid: None,
        }
    }
}

/// Caller-side waiting for capacity
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &LabConfig) -> Self {
        Self {
            timeout: config.reserve_timeout(),
            poll_interval: config.poll_interval(),
        }
    }

    /// Single attempt, no waiting
    pub fn once() -> Self {
        Self {
            timeout: Duration::ZERO,
            poll_interval: Duration::ZERO,
        }
    }
}

/// Ledger entry whose reserving process is gone
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaleEntry {
    pub kind: ResourceKind,
    pub index: usize,
    pub owner: String,
    pub pid: u32,
}

/// One request object and the number of units it asks for
struct RequestObject<'a> {
    kind: ResourceKind,
    constraint: &'a Value,
    times: usize,
}

/// Request objects in kind order, then request order
type CountedKinds = Vec<(ResourceKind, Vec<CountedRequest>)>;

pub struct ResourcePool {
    catalog: Catalog,
    state_dir: PathBuf,
    options: PoolOptions,
}

impl ResourcePool {
    pub fn new(catalog: Catalog, state_dir: impl Into<PathBuf>, options: PoolOptions) -> PoolResult<Self> {
        let state_dir = state_dir.into();
        fs::create_dir_all(&state_dir).map_err(|source| PoolError::Io {
            path: state_dir.clone(),
            source,
        })?;
        Ok(Self {
            catalog,
            state_dir,
            options,
        })
    }

    /// Load the configured catalog and open its state directory
    pub fn open(config: &LabConfig) -> PoolResult<Self> {
        let catalog = Catalog::load(&config.catalog)?;
        Self::new(catalog, &config.state_dir, PoolOptions::from_config(config))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Record `pid` instead of this process as the holder of new reservations
    pub fn with_holder_pid(mut self, pid: u32) -> Self {
        self.options.holder_pid = Some(pid);
        self
    }

    /// Pid written into the ledger for new reservations
    pub fn holder_pid(&self) -> u32 {
        self.options.holder_pid.unwrap_or_else(std::process::id)
    }

    fn lock(&self) -> PoolResult<LedgerLock> {
        Ok(LedgerLock::acquire(&self.state_dir, self.options.lock_timeout)?)
    }

    /// Must be called with the lock held
    fn load_verified(&self) -> PoolResult<Ledger> {
        let ledger = Ledger::load(&self.state_dir)?;
        ledger.verify(&self.catalog)?;
        Ok(ledger)
    }

    /// Reserve resources for `owner`, all or nothing.
    ///
    /// `wants` is `{kind: [{times, ...constraints}]}`. `modifiers` has the same
    /// shape and is overlaid position by position onto the reserved items of
    /// each kind.
    pub fn reserve(&self, owner: &str, wants: &Value, modifiers: &Value) -> PoolResult<Reservation> {
        if owner.trim().is_empty() {
            return Err(PoolError::InvalidRequest("owner must not be empty".to_string()));
        }
        let wants = prepare_request(wants)?;
        let modifiers = prepare_request(modifiers)?;
        let objects = request_objects(&wants);
        check_modifiers(&objects, &modifiers)?;

        let _lock = self.lock()?;
        let mut ledger = self.load_verified()?;

        let reserved: HashMap<ResourceKind, HashSet<usize>> = ResourceKind::ALL
            .iter()
            .map(|kind| (*kind, ledger.reserved_indices(*kind)))
            .collect();
        // Bounds every unit list below by the catalog size
        self.check_capacity(owner, &objects, &reserved)?;

        let object_candidates: Vec<Vec<usize>> = objects
            .iter()
            .map(|object| self.candidates(object, &reserved[&object.kind]))
            .collect();
        debug!(owner, candidates = ?object_candidates, "resolving resource request");

        let units: Vec<usize> = objects
            .iter()
            .enumerate()
            .flat_map(|(pos, object)| std::iter::repeat(pos).take(object.times))
            .collect();
        let candidates: Vec<Vec<usize>> = units.iter().map(|&pos| object_candidates[pos].clone()).collect();

        let assignment = solve(&candidates).map_err(|cause| {
            PoolError::NotSolvable(self.diagnose(owner, &objects, &reserved, cause))
        })?;
        let modifiers = expand_modifiers(&modifiers);

        let pid = self.holder_pid();
        let now = Utc::now();
        let mut positions: HashMap<ResourceKind, usize> = HashMap::new();
        let mut items = Vec::with_capacity(units.len());
        for (&pos, global) in units.iter().zip(assignment) {
            let kind = objects[pos].kind;
            let index = global - self.catalog.global_index(kind, 0);
            let item = self.catalog.get(kind, index).ok_or_else(|| {
                PoolError::ReservationConflict {
                    kind,
                    index,
                    reason: "assigned index outside catalog".to_string(),
                }
            })?;

            let position = positions.entry(kind).or_insert(0);
            let mut attrs = item.attrs.clone();
            if let Some(modifier) = modifiers.get(&kind).and_then(|list| list.get(*position).copied()) {
                overlay(&mut attrs, modifier)?;
            }
            *position += 1;

            ledger.insert(
                kind,
                LedgerEntry {
                    owner: owner.to_string(),
                    index,
                    item_sha256: item.sha256.clone(),
                    pid,
                    reserved_at: now,
                    item: item.attrs.clone(),
                },
            )?;
            items.push(ReservedItem::new(kind, index, attrs));
        }

        if !items.is_empty() {
            ledger.store(&self.state_dir)?;
        }
        info!(owner, items = items.len(), "reserved resources");
        Ok(Reservation::new(owner, items))
    }

    /// `reserve`, retrying while the request is merely unsatisfiable for now.
    ///
    /// Stops at the first other error, when `policy.timeout` has elapsed, or
    /// when `should_stop` returns true; the last `NotSolvable` is returned then.
    pub fn reserve_with_retry(
        &self,
        owner: &str,
        wants: &Value,
        modifiers: &Value,
        policy: &RetryPolicy,
        should_stop: impl Fn() -> bool,
    ) -> PoolResult<Reservation> {
        let start = Instant::now();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.reserve(owner, wants, modifiers) {
                Ok(reservation) => {
                    if attempts > 1 {
                        info!(owner, attempts, "reservation succeeded after waiting");
                    }
                    return Ok(reservation);
                }
                Err(e) if e.is_retryable() => {
                    if start.elapsed() >= policy.timeout || should_stop() {
                        return Err(e);
                    }
                    if attempts == 1 {
                        info!(owner, timeout_secs = policy.timeout.as_secs(), "resources busy, waiting");
                        debug!("{}", e);
                    }
                    std::thread::sleep(policy.poll_interval);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Release exactly the items of `reservation`. Idempotent.
    pub fn free(&self, reservation: &Reservation) -> PoolResult<usize> {
        let _lock = self.lock()?;
        let mut ledger = self.load_verified()?;

        let removed = reservation
            .all_items()
            .iter()
            .filter(|item| ledger.remove(reservation.owner(), item.kind, item.index))
            .count();

        if removed > 0 {
            ledger.store(&self.state_dir)?;
            info!(owner = reservation.owner(), items = removed, "freed resources");
        }
        Ok(removed)
    }

    /// Release everything held by `owner`
    pub fn free_owner(&self, owner: &str) -> PoolResult<usize> {
        let _lock = self.lock()?;
        let mut ledger = self.load_verified()?;
        let removed = ledger.remove_owner(owner);
        if removed > 0 {
            ledger.store(&self.state_dir)?;
            info!(owner, items = removed, "freed all resources of owner");
        }
        Ok(removed)
    }

    /// Snapshot of the ledger
    pub fn reserved(&self) -> PoolResult<Ledger> {
        let _lock = self.lock()?;
        self.load_verified()
    }

    /// Entries whose reserving process no longer exists on this host
    pub fn stale_entries(&self) -> PoolResult<Vec<StaleEntry>> {
        let _lock = self.lock()?;
        let ledger = self.load_verified()?;
        Ok(find_stale(&ledger))
    }

    /// Remove entries of dead processes, returning what was removed
    pub fn reclaim_stale(&self) -> PoolResult<Vec<StaleEntry>> {
        let _lock = self.lock()?;
        let mut ledger = self.load_verified()?;
        let stale = find_stale(&ledger);
        for entry in &stale {
            warn!(
                kind = %entry.kind,
                index = entry.index,
                owner = %entry.owner,
                pid = entry.pid,
                "reclaiming reservation of dead process"
            );
            ledger.remove(&entry.owner, entry.kind, entry.index);
        }
        if !stale.is_empty() {
            ledger.store(&self.state_dir)?;
        }
        Ok(stale)
    }

    /// Next value of a persistent counter: `first` on first use, then its
    /// decimal successors.
    pub fn next_persistent_value(&self, token: &str, first: &str) -> PoolResult<String> {
        if !counter::is_valid_token(token) {
            return Err(PoolError::InvalidRequest(format!("invalid counter name '{}'", token)));
        }
        if counter::increment_decimal(first).is_none() {
            return Err(PoolError::InvalidRequest(format!(
                "counter start '{}' is not a decimal number",
                first
            )));
        }

        let _lock = self.lock()?;
        let path = self.state_dir.join(counter::state_file_name(token));
        let io_err = |source| PoolError::Io {
            path: path.clone(),
            source,
        };

        let next = match fs::read_to_string(&path) {
            Ok(last) if last.trim().is_empty() => first.to_string(),
            Ok(last) => counter::increment_decimal(last.trim()).ok_or_else(|| {
                PoolError::InvalidRequest(format!(
                    "counter file {} holds '{}'",
                    path.display(),
                    last.trim()
                ))
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => first.to_string(),
            Err(e) => return Err(io_err(e)),
        };

        let write = || -> io::Result<()> {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?;
            writeln!(file, "{}", next)?;
            file.sync_all()
        };
        write().map_err(io_err)?;
        debug!(token, value = %next, "advanced persistent counter");
        Ok(next)
    }

    /// Global candidate ids for one request object, in catalog order
    fn candidates(&self, object: &RequestObject<'_>, reserved: &HashSet<usize>) -> Vec<usize> {
        self.catalog
            .items(object.kind)
            .iter()
            .filter(|item| !reserved.contains(&item.index) && item_matches(&item.attrs, object.constraint))
            .map(|item| self.catalog.global_index(object.kind, item.index))
            .collect()
    }

    /// Reject a request asking for more units of a kind than the catalog has
    fn check_capacity(
        &self,
        owner: &str,
        objects: &[RequestObject<'_>],
        reserved: &HashMap<ResourceKind, HashSet<usize>>,
    ) -> PoolResult<()> {
        let mut offset = 0usize;
        for kind in ResourceKind::ALL {
            let requested = objects
                .iter()
                .filter(|object| object.kind == kind)
                .fold(0usize, |sum, object| sum.saturating_add(object.times));
            let size = self.catalog.items(kind).len();
            if requested > size {
                // The first unit past the catalog size can never be placed
                let requester = offset + size;
                let available = object_at(objects, requester)
                    .map(|pos| self.candidates(&objects[pos], &reserved[&kind]).len())
                    .unwrap_or(0);
                let cause = if available == 0 {
                    NotSolvable::NoCandidates { requester }
                } else {
                    NotSolvable::Exhausted {
                        requester,
                        candidates: available,
                    }
                };
                return Err(PoolError::NotSolvable(self.diagnose(owner, objects, reserved, cause)));
            }
            offset += requested;
        }
        Ok(())
    }

    fn diagnose(
        &self,
        owner: &str,
        objects: &[RequestObject<'_>],
        reserved: &HashMap<ResourceKind, HashSet<usize>>,
        cause: NotSolvable,
    ) -> Diagnostics {
        let requests = objects
            .iter()
            .map(|object| {
                let items = self.catalog.items(object.kind);
                let matching: Vec<usize> = items
                    .iter()
                    .filter(|item| item_matches(&item.attrs, object.constraint))
                    .map(|item| item.index)
                    .collect();
                let held = &reserved[&object.kind];
                RequestDiagnostic {
                    kind: object.kind,
                    constraint: object.constraint.clone(),
                    units: object.times,
                    catalog_size: items.len(),
                    available: matching.iter().filter(|idx| !held.contains(idx)).count(),
                    matching: matching.len(),
                }
            })
            .collect();

        Diagnostics {
            owner: owner.to_string(),
            requests,
            unresolved: object_at(objects, cause.requester()),
            cause,
        }
    }
}

/// Validate a request or modifiers tree and split off its `times` counts
fn prepare_request(tree: &Value) -> PoolResult<CountedKinds> {
    if !tree.is_null() {
        request_schema().validate(tree)?;
    }
    let mut by_kind: HashMap<ResourceKind, Vec<CountedRequest>> = HashMap::new();
    for (name, objects) in count_times(tree)? {
        let kind = name
            .parse::<ResourceKind>()
            .map_err(|e| PoolError::InvalidRequest(e.to_string()))?;
        by_kind.insert(kind, objects);
    }
    Ok(ResourceKind::ALL
        .iter()
        .filter_map(|kind| by_kind.remove(kind).map(|objects| (*kind, objects)))
        .collect())
}

fn request_objects(wants: &CountedKinds) -> Vec<RequestObject<'_>> {
    wants
        .iter()
        .flat_map(|(kind, objects)| {
            objects.iter().map(move |object| RequestObject {
                kind: *kind,
                constraint: &object.constraint,
                times: usize::try_from(object.times).unwrap_or(usize::MAX),
            })
        })
        .collect()
}

/// Request object holding the unit at position `unit`
fn object_at(objects: &[RequestObject<'_>], unit: usize) -> Option<usize> {
    let mut end = 0usize;
    objects.iter().position(|object| {
        end = end.saturating_add(object.times);
        unit < end
    })
}

fn check_modifiers(objects: &[RequestObject<'_>], modifiers: &CountedKinds) -> PoolResult<()> {
    for (kind, list) in modifiers {
        let count = list.iter().fold(0u64, |sum, m| sum.saturating_add(m.times));
        let requested = objects
            .iter()
            .filter(|object| object.kind == *kind)
            .fold(0u64, |sum, object| sum.saturating_add(object.times as u64));
        if count > requested {
            return Err(PoolError::InvalidRequest(format!(
                "{} modifiers for '{}' but only {} requested",
                count, kind, requested
            )));
        }
    }
    Ok(())
}

/// Unroll modifiers, whose counts `check_modifiers` bounded by the request
fn expand_modifiers(modifiers: &CountedKinds) -> HashMap<ResourceKind, Vec<&Value>> {
    modifiers
        .iter()
        .map(|(kind, list)| {
            let units = list
                .iter()
                .flat_map(|m| std::iter::repeat(&m.constraint).take(usize::try_from(m.times).unwrap_or(usize::MAX)))
                .collect();
            (*kind, units)
        })
        .collect()
}

fn find_stale(ledger: &Ledger) -> Vec<StaleEntry> {
    let own_pid = std::process::id();
    ledger
        .iter()
        .filter(|(_, entry)| entry.pid != own_pid && !process_alive(entry.pid))
        .map(|(kind, entry)| StaleEntry {
            kind,
            index: entry.index,
            owner: entry.owner.clone(),
            pid: entry.pid,
        })
        .collect()
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None::<Signal>) {
        Ok(()) => true,
        // Exists but belongs to someone else
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn catalog() -> Catalog {
        Catalog::from_value(&json!({
            "bts": [
                {"label": "sysmo", "type": "osmo-bts-sysmo", "band": "GSM-1800"},
                {"label": "trx", "type": "osmo-bts-trx", "band": "GSM-1800"}
            ],
            "modem": [
                {"label": "m1", "imsi": "901700000000001", "features": ["sms"]},
                {"label": "m2", "imsi": "901700000000002", "features": ["sms", "voice"]},
                {"label": "m3", "imsi": "901700000000003", "features": ["sms", "voice"]}
            ]
        }))
        .unwrap()
    }

    fn pool(temp: &TempDir) -> ResourcePool {
        ResourcePool::new(catalog(), temp.path(), PoolOptions::default()).unwrap()
    }

    #[test]
    fn test_reserve_picks_first_matching_items() {
        let temp = TempDir::new().unwrap();
        let pool = pool(&temp);
        let r = pool
            .reserve("run-1", &json!({"modem": [{"times": 2}]}), &Value::Null)
            .unwrap();
        let indices: Vec<usize> = r.items(ResourceKind::Modem).map(|i| i.index).collect();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(pool.reserved().unwrap().len(), 2);
    }

    #[test]
    fn test_reserve_respects_constraints_and_ledger() {
        let temp = TempDir::new().unwrap();
        let pool = pool(&temp);
        let wants = json!({"modem": [{"features": ["voice"]}]});
        let a = pool.reserve("a", &wants, &Value::Null).unwrap();
        let b = pool.reserve("b", &wants, &Value::Null).unwrap();
        assert_eq!(a.all_items()[0].index, 1);
        assert_eq!(b.all_items()[0].index, 2);

        let err = pool.reserve("c", &wants, &Value::Null).unwrap_err();
        let PoolError::NotSolvable(diag) = err else {
            panic!("expected NotSolvable");
        };
        assert_eq!(diag.requests[0].matching, 2);
        assert_eq!(diag.requests[0].available, 0);
        assert_eq!(diag.unresolved, Some(0));
    }

    #[test]
    fn test_unsolvable_reserves_nothing() {
        let temp = TempDir::new().unwrap();
        let pool = pool(&temp);
        let wants = json!({"bts": [{}], "modem": [{"times": 4}]});
        assert!(pool.reserve("greedy", &wants, &Value::Null).is_err());
        assert!(pool.reserved().unwrap().is_empty());
    }

    #[test]
    fn test_times_beyond_catalog_rejected_without_expansion() {
        let temp = TempDir::new().unwrap();
        let pool = pool(&temp);
        let start = Instant::now();
        let err = pool
            .reserve(
                "greedy",
                &json!({"bts": [{}], "modem": [{"features": ["voice"]}, {"times": u64::MAX}]}),
                &Value::Null,
            )
            .unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(5));

        let PoolError::NotSolvable(diag) = err else {
            panic!("expected NotSolvable");
        };
        assert_eq!(diag.requests.len(), 3);
        assert_eq!(diag.requests[2].units, usize::try_from(u64::MAX).unwrap_or(usize::MAX));
        assert_eq!(diag.requests[2].catalog_size, 3);
        // bts[0], modem[0], then modem units 1 and 2 fit, unit 3 does not
        assert_eq!(diag.cause.requester(), 4);
        assert_eq!(diag.unresolved, Some(2));
        assert!(pool.reserved().unwrap().is_empty());
    }

    #[test]
    fn test_times_up_to_catalog_size_still_solved() {
        let temp = TempDir::new().unwrap();
        let pool = pool(&temp);
        let r = pool.reserve("all", &json!({"modem": [{"times": 3}]}), &Value::Null).unwrap();
        assert_eq!(r.len(), 3);
        let err = pool.reserve("more", &json!({"modem": [{"times": 3}]}), &Value::Null).unwrap_err();
        let PoolError::NotSolvable(diag) = err else {
            panic!("expected NotSolvable");
        };
        assert_eq!(diag.requests[0].available, 0);
        assert_eq!(diag.cause.requester(), 0);
    }

    #[test]
    fn test_huge_modifier_count_rejected() {
        let temp = TempDir::new().unwrap();
        let pool = pool(&temp);
        let err = pool
            .reserve("run", &json!({"bts": [{}]}), &json!({"bts": [{"times": u64::MAX}]}))
            .unwrap_err();
        assert!(matches!(err, PoolError::InvalidRequest(_)));
    }

    #[test]
    fn test_holder_pid_is_recorded() {
        let temp = TempDir::new().unwrap();
        let pool = pool(&temp).with_holder_pid(1);
        assert_eq!(pool.holder_pid(), 1);
        pool.reserve("manual", &json!({"bts": [{}]}), &Value::Null).unwrap();
        let ledger = pool.reserved().unwrap();
        assert_eq!(ledger.entries(ResourceKind::Bts)[0].pid, 1);

        let own = ResourcePool::new(catalog(), temp.path(), PoolOptions::default()).unwrap();
        assert_eq!(own.holder_pid(), std::process::id());
    }

    #[test]
    fn test_modifiers_apply_positionally() {
        let temp = TempDir::new().unwrap();
        let pool = pool(&temp);
        let r = pool
            .reserve(
                "run",
                &json!({"bts": [{"times": 2}]}),
                &json!({"bts": [{}, {"band": "GSM-900"}]}),
            )
            .unwrap();
        let bts: Vec<&ReservedItem> = r.items(ResourceKind::Bts).collect();
        assert_eq!(bts[0].attrs["band"], "GSM-1800");
        assert_eq!(bts[1].attrs["band"], "GSM-900");

        // The ledger keeps the catalog attributes
        let ledger = pool.reserved().unwrap();
        assert_eq!(ledger.entries(ResourceKind::Bts)[1].item["band"], "GSM-1800");
    }

    #[test]
    fn test_too_many_modifiers_rejected() {
        let temp = TempDir::new().unwrap();
        let pool = pool(&temp);
        let err = pool
            .reserve("run", &json!({"bts": [{}]}), &json!({"bts": [{}, {}]}))
            .unwrap_err();
        assert!(matches!(err, PoolError::InvalidRequest(_)));
    }

    #[test]
    fn test_invalid_request_shapes() {
        let temp = TempDir::new().unwrap();
        let pool = pool(&temp);
        assert!(matches!(
            pool.reserve("run", &json!({"attenuator": []}), &Value::Null),
            Err(PoolError::InvalidRequest(_))
        ));
        assert!(matches!(
            pool.reserve("run", &json!({"modem": [{"colour": "red"}]}), &Value::Null),
            Err(PoolError::Schema(_))
        ));
        assert!(matches!(
            pool.reserve("run", &json!({"modem": [{"times": 0}]}), &Value::Null),
            Err(PoolError::Schema(_))
        ));
        assert!(matches!(
            pool.reserve(" ", &json!({}), &Value::Null),
            Err(PoolError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_free_is_idempotent_and_owner_scoped() {
        let temp = TempDir::new().unwrap();
        let pool = pool(&temp);
        let a = pool.reserve("a", &json!({"bts": [{}]}), &Value::Null).unwrap();
        let _b = pool.reserve("b", &json!({"bts": [{}]}), &Value::Null).unwrap();

        assert_eq!(pool.free(&a).unwrap(), 1);
        assert_eq!(pool.free(&a).unwrap(), 0);
        let ledger = pool.reserved().unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.owner_of(ResourceKind::Bts, 1), Some("b"));

        assert_eq!(pool.free_owner("b").unwrap(), 1);
        assert!(pool.reserved().unwrap().is_empty());
    }

    #[test]
    fn test_guard_frees_on_drop() {
        let temp = TempDir::new().unwrap();
        let pool = pool(&temp);
        {
            let r = pool.reserve("scoped", &json!({"modem": [{}]}), &Value::Null).unwrap();
            let guard = ReservationGuard::new(&pool, r);
            assert_eq!(guard.reservation().len(), 1);
            assert_eq!(pool.reserved().unwrap().len(), 1);
        }
        assert!(pool.reserved().unwrap().is_empty());
    }

    #[test]
    fn test_guard_release_reports_count() {
        let temp = TempDir::new().unwrap();
        let pool = pool(&temp);
        let r = pool.reserve("scoped", &json!({"modem": [{"times": 2}]}), &Value::Null).unwrap();
        let guard = ReservationGuard::new(&pool, r);
        assert_eq!(guard.release().unwrap(), 2);
        assert!(pool.reserved().unwrap().is_empty());
    }

    #[test]
    fn test_retry_gives_up_after_timeout() {
        let temp = TempDir::new().unwrap();
        let pool = pool(&temp);
        let _held = pool.reserve("a", &json!({"bts": [{"times": 2}]}), &Value::Null).unwrap();
        let policy = RetryPolicy {
            timeout: Duration::from_millis(60),
            poll_interval: Duration::from_millis(20),
        };
        let start = Instant::now();
        let err = pool
            .reserve_with_retry("b", &json!({"bts": [{}]}), &Value::Null, &policy, || false)
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn test_retry_does_not_retry_fatal_errors() {
        let temp = TempDir::new().unwrap();
        let pool = pool(&temp);
        let policy = RetryPolicy {
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(10),
        };
        let err = pool
            .reserve_with_retry("b", &json!({"enb": [{"colour": 1}]}), &Value::Null, &policy, || false)
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_persistent_counter() {
        let temp = TempDir::new().unwrap();
        let pool = pool(&temp);
        assert_eq!(pool.next_persistent_value("msisdn", "0998").unwrap(), "0998");
        assert_eq!(pool.next_persistent_value("msisdn", "0998").unwrap(), "0999");
        assert_eq!(pool.next_persistent_value("msisdn", "0998").unwrap(), "1000");
        assert_eq!(pool.next_persistent_value("other", "7").unwrap(), "7");
        assert!(pool.next_persistent_value("../x", "1").is_err());
        assert!(pool.next_persistent_value("x", "one").is_err());
    }
}
