//! Cross-process ledger lock
//!
//! Advisory `flock` on `<state_dir>/lock`. Cooperative only: every process
//! that touches the ledger must take this lock, and must hold it for a single
//! read-modify-write cycle, never while tests run. The kernel drops the lock
//! of a killed holder.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

pub type LockResult<T> = Result<T, LockError>;

/// Errors from lock operations
#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {waited:?} waiting for ledger lock {}", path.display())]
    Timeout { path: PathBuf, waited: Duration },

    #[error("I/O error on ledger lock: {0}")]
    Io(#[from] io::Error),
}

/// Exclusive lock on a state directory, released on drop.
pub struct LedgerLock {
    lock_path: PathBuf,
    lock_file: File,
}

impl LedgerLock {
    pub const LOCK_FILENAME: &'static str = "lock";

    const POLL_INTERVAL: Duration = Duration::from_millis(50);
    const CONTENTION_WARNING: Duration = Duration::from_millis(500);

    /// Acquire the lock, waiting up to `timeout`.
    ///
    /// Creates the state directory and lock file if they don't exist.
    pub fn acquire(state_dir: &Path, timeout: Duration) -> LockResult<Self> {
        fs::create_dir_all(state_dir)?;

        let lock_path = state_dir.join(Self::LOCK_FILENAME);
        let start = Instant::now();
        let mut warned = false;

        loop {
            match Self::try_acquire_exclusive(&lock_path) {
                Ok(file) => {
                    if warned {
                        warn!(
                            path = %lock_path.display(),
                            waited_ms = start.elapsed().as_millis() as u64,
                            "ledger lock acquired after contention"
                        );
                    } else {
                        debug!(path = %lock_path.display(), "ledger lock acquired");
                    }
                    return Ok(Self {
                        lock_path,
                        lock_file: file,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !warned && start.elapsed() > Self::CONTENTION_WARNING {
                        warn!(path = %lock_path.display(), "ledger lock contended, waiting");
                        warned = true;
                    }
                }
                Err(e) => return Err(LockError::Io(e)),
            }

            if start.elapsed() >= timeout {
                return Err(LockError::Timeout {
                    path: lock_path,
                    waited: start.elapsed(),
                });
            }

            std::thread::sleep(Self::POLL_INTERVAL);
        }
    }

    #[cfg(unix)]
    fn try_acquire_exclusive(lock_path: &Path) -> io::Result<File> {
        use std::os::unix::fs::OpenOptionsExt;
        use std::os::unix::io::AsRawFd;

        // No truncate: the file carries no data and may be held by another process.
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o644)
            .open(lock_path)?;

        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };

        if result == 0 {
            Ok(file)
        } else {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held"))
            } else {
                Err(err)
            }
        }
    }

    #[cfg(not(unix))]
    fn try_acquire_exclusive(lock_path: &Path) -> io::Result<File> {
        match OpenOptions::new().write(true).create_new(true).open(lock_path) {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held"))
            }
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            unsafe {
                libc::flock(self.lock_file.as_raw_fd(), libc::LOCK_UN);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = &self.lock_file;
            let _ = fs::remove_file(&self.lock_path);
        }
        debug!(path = %self.lock_path.display(), "ledger lock released");
    }
}
