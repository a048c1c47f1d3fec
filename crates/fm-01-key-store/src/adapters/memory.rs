//! In-memory key storage.

use crate::domain::errors::KeyStoreError;
use crate::ports::outbound::KeyStorage;
use parking_lot::RwLock;
use shared_types::{KeyRecord, MinionId};
use std::collections::BTreeMap;

/// `KeyStorage` backed by a map. Lost on drop.
#[derive(Default)]
pub struct MemoryKeyStorage {
    records: RwLock<BTreeMap<MinionId, KeyRecord>>,
}

impl MemoryKeyStorage {
    /// Empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStorage for MemoryKeyStorage {
    fn load(&self, minion_id: &MinionId) -> Result<Option<KeyRecord>, KeyStoreError> {
        Ok(self.records.read().get(minion_id).cloned())
    }

    fn store(&self, record: &KeyRecord) -> Result<(), KeyStoreError> {
        self.records
            .write()
            .insert(record.minion_id.clone(), record.clone());
        Ok(())
    }

    fn remove(&self, minion_id: &MinionId) -> Result<bool, KeyStoreError> {
        Ok(self.records.write().remove(minion_id).is_some())
    }

    fn list(&self) -> Result<Vec<KeyRecord>, KeyStoreError> {
        Ok(self.records.read().values().cloned().collect())
    }
}
