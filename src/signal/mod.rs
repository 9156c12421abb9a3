//! SIGINT/SIGTERM handling
//!
//! First signal: request cancellation. The running test is stopped, the
//! remaining tests are marked ERROR, reservations are freed and the process
//! exits with `EXIT_CODE_CANCELLED`.
//! Second signal: the launcher kills the test child without a grace period.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

/// Exit code for cancelled runs
pub const EXIT_CODE_CANCELLED: i32 = 80;

/// Shared signal state
#[derive(Debug, Default)]
pub struct SignalState {
    cancel_requested: AtomicBool,
    immediate_exit: AtomicBool,
    signal_count: AtomicU8,
    /// Test executing when the signal arrived, for the log line
    current_test: Mutex<Option<String>>,
}

/// Action to take after receiving a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    InitiateCancellation,
    ImmediateExit,
    Ignore,
}

impl SignalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    pub fn is_immediate_exit(&self) -> bool {
        self.immediate_exit.load(Ordering::SeqCst)
    }

    pub fn signal_count(&self) -> u8 {
        self.signal_count.load(Ordering::SeqCst)
    }

    pub fn handle_signal(&self) -> SignalAction {
        let count = self.signal_count.fetch_add(1, Ordering::SeqCst);
        match count {
            0 => {
                self.cancel_requested.store(true, Ordering::SeqCst);
                SignalAction::InitiateCancellation
            }
            1 => {
                self.immediate_exit.store(true, Ordering::SeqCst);
                SignalAction::ImmediateExit
            }
            _ => SignalAction::Ignore,
        }
    }

    pub fn set_current_test(&self, name: Option<&str>) {
        if let Ok(mut current) = self.current_test.lock() {
            *current = name.map(str::to_string);
        }
    }

    pub fn current_test(&self) -> Option<String> {
        self.current_test.lock().ok().and_then(|c| c.clone())
    }
}

/// Cheap handle polled by the runner and launcher
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    state: Arc<SignalState>,
}

impl Cancellation {
    pub fn new(state: Arc<SignalState>) -> Self {
        Self { state }
    }

    /// Handle that is never cancelled
    pub fn never() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancel_requested()
    }

    pub fn should_exit_immediately(&self) -> bool {
        self.state.is_immediate_exit()
    }

    pub fn set_current_test(&self, name: Option<&str>) {
        self.state.set_current_test(name);
    }

    /// Request cancellation programmatically
    pub fn cancel(&self) {
        self.state.cancel_requested.store(true, Ordering::SeqCst);
    }
}

/// Installs the process-wide handler
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    pub fn new() -> Self {
        Self {
            state: Arc::new(SignalState::new()),
        }
    }

    pub fn cancellation(&self) -> Cancellation {
        Cancellation::new(Arc::clone(&self.state))
    }

    /// Install handlers for SIGINT and SIGTERM. Call once at startup.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let state = Arc::clone(&self.state);
        ctrlc::set_handler(move || match state.handle_signal() {
            SignalAction::InitiateCancellation => {
                warn!(
                    test = state.current_test().as_deref().unwrap_or("-"),
                    "interrupt received, cancelling run"
                );
            }
            SignalAction::ImmediateExit => {
                warn!("second interrupt received, killing running test");
            }
            SignalAction::Ignore => {}
        })
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_signal_requests_cancellation() {
        let state = SignalState::new();
        assert_eq!(state.handle_signal(), SignalAction::InitiateCancellation);
        assert!(state.is_cancel_requested());
        assert!(!state.is_immediate_exit());
    }

    #[test]
    fn test_second_signal_requests_immediate_exit() {
        let state = SignalState::new();
        state.handle_signal();
        assert_eq!(state.handle_signal(), SignalAction::ImmediateExit);
        assert!(state.is_immediate_exit());
        assert_eq!(state.handle_signal(), SignalAction::Ignore);
        assert_eq!(state.signal_count(), 3);
    }

    #[test]
    fn test_cancellation_handle_shares_state() {
        let state = Arc::new(SignalState::new());
        let cancel = Cancellation::new(Arc::clone(&state));
        assert!(!cancel.is_cancelled());

        cancel.set_current_test(Some("handover.py"));
        state.handle_signal();
        assert!(cancel.is_cancelled());
        assert_eq!(state.current_test().as_deref(), Some("handover.py"));
    }

    #[test]
    fn test_never_is_not_cancelled_until_asked() {
        let cancel = Cancellation::never();
        assert!(!cancel.is_cancelled());
        cancel.cancel();
        assert!(cancel.is_cancelled());
    }
}
