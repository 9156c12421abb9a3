//! Test status state machine
//!
//! A test starts UNKNOWN and moves exactly once to one of PASS, FAIL, ERROR
//! or SKIP. Suite and trial verdicts are aggregated from these.

mod test_state;

pub use test_state::{Test, TestStateError, TestStatus};

use std::sync::atomic::{AtomicU64, Ordering};

static SEQUENCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Next sequence number, for ordering status changes within this process
pub fn next_seq() -> u64 {
    SEQUENCE_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Check if a state is terminal (no further transitions possible)
pub trait TerminalState {
    fn is_terminal(&self) -> bool;
}

/// Suite verdict from its tests' statuses.
///
/// FAIL if any test failed or errored; PASS if at least one test passed and
/// all others passed or were skipped; UNKNOWN otherwise, including when every
/// test was skipped or there are no tests.
pub fn aggregate_status(statuses: impl IntoIterator<Item = TestStatus>) -> TestStatus {
    let mut any_pass = false;
    let mut all_settled = true;
    for status in statuses {
        match status {
            TestStatus::Fail | TestStatus::Error => return TestStatus::Fail,
            TestStatus::Pass => any_pass = true,
            TestStatus::Skip => {}
            TestStatus::Unknown => all_settled = false,
        }
    }
    if any_pass && all_settled {
        TestStatus::Pass
    } else {
        TestStatus::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TestStatus::*;

    #[test]
    fn test_aggregate_fail_dominates() {
        assert_eq!(aggregate_status([Pass, Error, Skip]), Fail);
        assert_eq!(aggregate_status([Unknown, Fail]), Fail);
    }

    #[test]
    fn test_aggregate_pass_needs_an_executed_test() {
        assert_eq!(aggregate_status([Pass, Skip]), Pass);
        assert_eq!(aggregate_status([Skip, Skip]), Unknown);
        assert_eq!(aggregate_status([]), Unknown);
    }

    #[test]
    fn test_aggregate_pending_tests_keep_unknown() {
        assert_eq!(aggregate_status([Pass, Unknown]), Unknown);
    }

    #[test]
    fn test_seq_is_monotonic() {
        let a = next_seq();
        let b = next_seq();
        assert!(b > a);
    }
}
