//! # Lock Security
//!
//! Lock path containment and the default wait.

use std::path::Path;
use std::time::Duration;

/// Default wait for a contended lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether `lock_path` resolves inside `dir`.
pub fn validate_lock_path(dir: &Path, lock_path: &Path) -> bool {
    lock_path
        .canonicalize()
        .ok()
        .and_then(|canonical| {
            dir.canonicalize()
                .ok()
                .map(|dir_canonical| canonical.starts_with(&dir_canonical))
        })
        .unwrap_or(false)
}
