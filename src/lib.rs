//! lab-broker: shared lab resource reservation and trial execution
//!
//! Test suites running on one machine share a catalog of lab hardware (base
//! stations, modems, addresses, radio channels). Each run asks for resources
//! by attribute constraints; the pool solves the request against the free
//! catalog items and records the result in a lock-protected ledger so that
//! concurrent runs never hold the same item. Suites and scenarios compose
//! into one effective request, and a trial ties suite runs to a verified set
//! of software packages.

pub mod config;
pub mod kind;
pub mod logging;
pub mod pool;
pub mod report;
pub mod signal;
pub mod solver;
pub mod state;
pub mod suite;
pub mod trial;

pub use config::{ConfigError, EffectiveConfig, LabConfig};
pub use kind::{DriverRegistry, ResourceDriver, ResourceKind};
pub use pool::{Catalog, Ledger, PoolError, PoolOptions, Reservation, ResourcePool, RetryPolicy};
pub use solver::{solve, NotSolvable};
pub use state::{Test, TestStatus};
pub use suite::{Scenario, SuiteDefinition, SuiteError, SuiteRun};
pub use trial::{Trial, TrialError};
