//! # Key Store Service
//!
//! Implements [`KeyStoreApi`] and [`KeyAdminApi`] over any [`KeyStorage`].
//!
//! ## Concurrency
//!
//! Reads go straight to storage. Every read-modify-write runs under the
//! stripe mutex of its `MinionId`, so two handshakes for the same ID cannot
//! both create a record, while different IDs rarely contend.

use crate::domain::errors::KeyStoreError;
use crate::domain::outcome::ProposeOutcome;
use crate::domain::policy::AutoAcceptPolicy;
use crate::ports::inbound::{KeyAdminApi, KeyStoreApi};
use crate::ports::outbound::KeyStorage;
use parking_lot::{Mutex, MutexGuard};
use shared_crypto::RsaPublicKey;
use shared_types::{KeyRecord, KeyState, MinionId, PublicKeyPem, TimeSource};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{info, warn};

/// Number of mutation stripes.
pub const LOCK_STRIPES: usize = 64;

/// The key store.
pub struct KeyStoreService<S: KeyStorage> {
    storage: S,
    policy: AutoAcceptPolicy,
    time_source: Arc<dyn TimeSource>,
    stripes: Vec<Mutex<()>>,
}

impl<S: KeyStorage> KeyStoreService<S> {
    /// Create a service over `storage`.
    pub fn new(storage: S, policy: AutoAcceptPolicy, time_source: Arc<dyn TimeSource>) -> Self {
        Self {
            storage,
            policy,
            time_source,
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Active auto-accept policy.
    #[must_use]
    pub fn policy(&self) -> &AutoAcceptPolicy {
        &self.policy
    }

    /// Underlying storage.
    #[must_use]
    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn stripe(&self, minion_id: &MinionId) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        minion_id.hash(&mut hasher);
        let index = (hasher.finish() % self.stripes.len() as u64) as usize;
        self.stripes[index].lock()
    }
}

impl<S: KeyStorage> KeyStoreApi for KeyStoreService<S> {
    fn lookup(&self, minion_id: &MinionId) -> Result<Option<KeyRecord>, KeyStoreError> {
        self.storage.load(minion_id)
    }

    fn propose(
        &self,
        minion_id: &MinionId,
        public_key: &PublicKeyPem,
    ) -> Result<ProposeOutcome, KeyStoreError> {
        let _guard = self.stripe(minion_id);

        if let Some(existing) = self.storage.load(minion_id)? {
            if existing.public_key == *public_key {
                return Ok(ProposeOutcome::Existing(existing));
            }
            warn!(
                minion = %minion_id,
                state = %existing.state,
                "[fm-01] Presented key differs from stored key"
            );
            return Ok(ProposeOutcome::KeyMismatch(existing));
        }

        let now = self.time_source.now();
        let accepted = self.policy.allows(minion_id);
        let record = KeyRecord {
            minion_id: minion_id.clone(),
            public_key: public_key.clone(),
            state: if accepted {
                KeyState::Accepted
            } else {
                KeyState::Pending
            },
            first_seen: now,
            last_accepted: accepted.then_some(now),
        };
        self.storage.store(&record)?;

        info!(minion = %minion_id, state = %record.state, "[fm-01] New key recorded");
        Ok(ProposeOutcome::Created(record))
    }

    fn set_state(&self, minion_id: &MinionId, state: KeyState) -> Result<KeyRecord, KeyStoreError> {
        let _guard = self.stripe(minion_id);

        let mut record = self
            .storage
            .load(minion_id)?
            .ok_or_else(|| KeyStoreError::NotFound(minion_id.clone()))?;
        let previous = record.state;
        record.state = state;
        if state == KeyState::Accepted {
            record.last_accepted = Some(self.time_source.now());
        }
        self.storage.store(&record)?;

        info!(minion = %minion_id, from = %previous, to = %state, "[fm-01] Key state changed");
        Ok(record)
    }

    fn delete(&self, minion_id: &MinionId) -> Result<(), KeyStoreError> {
        let _guard = self.stripe(minion_id);

        if !self.storage.remove(minion_id)? {
            return Err(KeyStoreError::NotFound(minion_id.clone()));
        }
        info!(minion = %minion_id, "[fm-01] Key deleted");
        Ok(())
    }
}

impl<S: KeyStorage> KeyAdminApi for KeyStoreService<S> {
    fn list_all(&self) -> Result<Vec<KeyRecord>, KeyStoreError> {
        let mut records = self.storage.list()?;
        records.sort_by(|a, b| a.minion_id.cmp(&b.minion_id));
        Ok(records)
    }

    fn fingerprint(&self, minion_id: &MinionId) -> Result<String, KeyStoreError> {
        let record = self
            .storage
            .load(minion_id)?
            .ok_or_else(|| KeyStoreError::NotFound(minion_id.clone()))?;
        RsaPublicKey::from_pem(record.public_key.as_str())
            .and_then(|key| key.fingerprint())
            .map_err(|e| KeyStoreError::InvalidKey(e.to_string()))
    }
}
