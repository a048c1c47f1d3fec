//! # Domain Errors

use shared_types::MinionId;
use thiserror::Error;

/// Errors from key store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyStoreError {
    /// No record exists for this minion.
    #[error("No key record for minion {0}")]
    NotFound(MinionId),

    /// Filesystem I/O failed; fatal to this operation only.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A record on disk could not be interpreted.
    #[error("Corrupt record for minion {minion_id}: {reason}")]
    Corrupt {
        /// Affected minion.
        minion_id: MinionId,
        /// What was wrong.
        reason: String,
    },

    /// The stored public key could not be parsed.
    #[error("Invalid stored key: {0}")]
    InvalidKey(String),

    /// The store is locked by another master process.
    #[error("Key store lock: {0}")]
    Lock(String),
}

impl From<std::io::Error> for KeyStoreError {
    fn from(e: std::io::Error) -> Self {
        KeyStoreError::Storage(e.to_string())
    }
}
