//! # Outbound Ports (Driven Ports)
//!
//! Persistence required by the key store service.
//!
//! Production: [`FileKeyStorage`](crate::FileKeyStorage)
//! Testing: [`MemoryKeyStorage`](crate::MemoryKeyStorage)

use crate::domain::errors::KeyStoreError;
use shared_types::{KeyRecord, MinionId};

/// Record persistence. Callers serialize mutations per minion; adapters only
/// need to make each call individually atomic.
pub trait KeyStorage: Send + Sync {
    /// Read one record.
    fn load(&self, minion_id: &MinionId) -> Result<Option<KeyRecord>, KeyStoreError>;

    /// Write the key and state of `record`, replacing any previous state.
    fn store(&self, record: &KeyRecord) -> Result<(), KeyStoreError>;

    /// Remove a record. Returns whether one existed.
    fn remove(&self, minion_id: &MinionId) -> Result<bool, KeyStoreError>;

    /// Every readable record. Unreadable entries are skipped.
    fn list(&self) -> Result<Vec<KeyRecord>, KeyStoreError>;
}
