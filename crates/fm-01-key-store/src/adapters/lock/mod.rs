//! # Store Process Lock
//!
//! Two masters pointed at the same `<base>/minions` directory would race
//! each other's marker renames. The first one to start takes an exclusive
//! `fs2` lock on `minions/.lock`; the second fails fast.
//!
//! The lock file carries the holder's PID for diagnostics only. Liveness is
//! the kernel lock itself: it is released when the holder exits, so a file
//! left behind is simply locked again. The file is never unlinked, since a
//! PID cannot be checked across PID namespaces and an unlinked lock file
//! lets a second opener lock a fresh inode.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

mod security;

pub use security::{validate_lock_path, DEFAULT_LOCK_TIMEOUT};

/// Errors from store locking.
#[derive(Debug, Error)]
pub enum LockError {
    /// Lock file could not be created.
    #[error("Failed to create lock file: {0}")]
    CreateFailed(#[source] io::Error),

    /// Another process holds the lock.
    #[error("Key store already in use (lock {path:?}, holder pid {pid:?})")]
    AlreadyLocked {
        /// PID recorded in the lock file, if readable.
        pid: Option<u32>,
        /// Lock file path.
        path: PathBuf,
    },

    /// Failed to record our PID.
    #[error("Failed to write PID to lock file: {0}")]
    WriteFailed(#[source] io::Error),
}

/// Exclusive lock on a store directory, released on drop.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
    pid: u32,
}

impl StoreLock {
    /// Lock file name inside the store directory.
    pub const LOCK_FILE: &'static str = ".lock";

    /// Acquire the lock on `dir`, retrying with backoff until `timeout`.
    ///
    /// # Errors
    ///
    /// `AlreadyLocked` if it is still held at the deadline.
    pub fn acquire(dir: &Path, timeout: Duration) -> Result<Self, LockError> {
        let deadline = Instant::now() + timeout;
        let lock_path = dir.join(Self::LOCK_FILE);
        let mut retry_delay = Duration::from_millis(20);

        loop {
            if lock_path.exists() && !validate_lock_path(dir, &lock_path) {
                return Err(LockError::CreateFailed(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "Lock path escapes store directory",
                )));
            }

            // Not truncated on open: a held lock file keeps its holder's PID.
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(&lock_path)
                .map_err(LockError::CreateFailed)?;

            match file.try_lock_exclusive() {
                Ok(()) => {
                    let pid = std::process::id();
                    let mut locked = file;
                    locked.set_len(0).map_err(LockError::WriteFailed)?;
                    writeln!(locked, "{pid}").map_err(LockError::WriteFailed)?;
                    locked.sync_all().map_err(LockError::WriteFailed)?;
                    debug!(path = %lock_path.display(), pid, "[fm-01] Store lock acquired");

                    return Ok(Self {
                        file: locked,
                        path: lock_path,
                        pid,
                    });
                }
                Err(_) => {
                    if Instant::now() >= deadline {
                        return Err(LockError::AlreadyLocked {
                            pid: Self::read_existing_pid(&lock_path),
                            path: lock_path,
                        });
                    }

                    drop(file);
                    std::thread::sleep(retry_delay);
                    retry_delay = (retry_delay * 2).min(Duration::from_millis(500));
                }
            }
        }
    }

    /// PID of the holder (this process).
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_existing_pid(path: &Path) -> Option<u32> {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        #[allow(clippy::incompatible_msrv)]
        let _ = FileExt::unlock(&self.file);
    }
}
