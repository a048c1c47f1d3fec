//! Time source port.
//!
//! Services take an `Arc<dyn TimeSource>` so tests can drive expiry and
//! idle sweeps deterministically.

use crate::entities::Timestamp;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Abstract interface for the current time.
pub trait TimeSource: Send + Sync {
    /// Get the current timestamp.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Timestamp::new(secs)
    }
}

/// A manually driven time source for tests.
///
/// # Example
///
/// ```rust
/// use shared_types::{FixedTimeSource, TimeSource};
///
/// let time = FixedTimeSource::new(1000);
/// time.advance(30);
/// assert_eq!(time.now().as_secs(), 1030);
/// ```
#[derive(Debug, Default)]
pub struct FixedTimeSource {
    secs: AtomicU64,
}

impl FixedTimeSource {
    /// Create a time source fixed at `secs`.
    #[must_use]
    pub fn new(secs: u64) -> Self {
        Self {
            secs: AtomicU64::new(secs),
        }
    }

    /// Move time forward.
    pub fn advance(&self, secs: u64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }

    /// Jump to an absolute time.
    pub fn set(&self, secs: u64) {
        self.secs.store(secs, Ordering::SeqCst);
    }
}

impl TimeSource for FixedTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.secs.load(Ordering::SeqCst))
    }
}
