//! Built-in defaults (layer 1)

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabDefaults {
    /// Directory holding the ledger, its lock and persistent counters
    pub state_dir: String,

    /// Resource catalog
    pub catalog: String,

    pub suites_dir: String,
    pub scenarios_dir: String,
    pub trials_dir: String,

    /// Wait for the ledger lock (default: 30s)
    pub lock_timeout_secs: u64,

    /// How long a run keeps retrying an unsolvable reservation (default: 10 min)
    pub reserve_timeout_secs: u64,

    /// Sleep between reservation attempts (default: 1s)
    pub poll_interval_ms: u64,

    /// Per-test timeout (default: 30 min)
    pub test_timeout_secs: u64,
}

impl Default for LabDefaults {
    fn default() -> Self {
        Self {
            state_dir: "state".to_string(),
            catalog: "resources.toml".to_string(),
            suites_dir: "suites".to_string(),
            scenarios_dir: "scenarios".to_string(),
            trials_dir: "trials".to_string(),
            lock_timeout_secs: 30,
            reserve_timeout_secs: 600,
            poll_interval_ms: 1000,
            test_timeout_secs: 1800,
        }
    }
}

impl LabDefaults {
    /// Convert to a JSON tree for merging
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "state_dir": self.state_dir,
            "catalog": self.catalog,
            "suites_dir": self.suites_dir,
            "scenarios_dir": self.scenarios_dir,
            "trials_dir": self.trials_dir,
            "lock_timeout_secs": self.lock_timeout_secs,
            "reserve_timeout_secs": self.reserve_timeout_secs,
            "poll_interval_ms": self.poll_interval_ms,
            "test_timeout_secs": self.test_timeout_secs,
        })
    }
}
