//! Pool errors and unsolvable-request diagnostics

use std::fmt;
use std::io;
use std::path::PathBuf;

use lab_config::{MergeError, SchemaError};
use serde::Serialize;
use serde_json::Value;

use super::catalog::CatalogError;
use super::ledger::LedgerError;
use super::lock::LockError;
use crate::kind::ResourceKind;
use crate::solver::NotSolvable;

/// Resource pool errors
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("resource request cannot be satisfied\n{0}")]
    NotSolvable(Diagnostics),

    /// The ledger disagrees with the catalog or with itself
    #[error("ledger conflict on {kind}[{index}]: {reason}")]
    ReservationConflict {
        kind: ResourceKind,
        index: usize,
        reason: String,
    },

    #[error("invalid resource request: {0}")]
    InvalidRequest(String),

    #[error("invalid resource request: {0}")]
    Schema(#[from] SchemaError),

    #[error("invalid resource request: {0}")]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Ledger(LedgerError),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PoolError {
    /// Only capacity shortage is worth waiting out
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::NotSolvable(_))
    }
}

impl From<LedgerError> for PoolError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Conflict {
                kind,
                index,
                reason,
            } => PoolError::ReservationConflict {
                kind,
                index,
                reason,
            },
            other => PoolError::Ledger(other),
        }
    }
}

/// Candidate counts for one request object
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestDiagnostic {
    pub kind: ResourceKind,
    pub constraint: Value,
    /// Units asked for with this constraint
    pub units: usize,
    pub catalog_size: usize,
    /// Catalog items satisfying the constraint
    pub matching: usize,
    /// Matching items not held by anyone
    pub available: usize,
}

/// Why a reservation could not be made
#[derive(Debug, Clone)]
pub struct Diagnostics {
    pub owner: String,
    pub requests: Vec<RequestDiagnostic>,
    /// Position in `requests` of the first unresolvable request
    pub unresolved: Option<usize>,
    pub cause: NotSolvable,
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "owner '{}':", self.owner)?;
        for (pos, req) in self.requests.iter().enumerate() {
            write!(
                f,
                "  {} x{} {}: {} in catalog, {} matching, {} free",
                req.kind, req.units, req.constraint, req.catalog_size, req.matching, req.available
            )?;
            if self.unresolved == Some(pos) {
                write!(f, "  <- first unresolvable")?;
            }
            writeln!(f)?;
        }
        write!(f, "  ({})", self.cause)
    }
}
