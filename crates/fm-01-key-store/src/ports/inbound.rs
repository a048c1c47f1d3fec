//! # Inbound Ports (Driving Ports)
//!
//! What the handshake and the operator tooling call.

use crate::domain::errors::KeyStoreError;
use crate::domain::outcome::ProposeOutcome;
use shared_types::{KeyRecord, KeyState, MinionId, PublicKeyPem};

/// Key store operations used by the auth handshake.
pub trait KeyStoreApi: Send + Sync {
    /// Current record of a minion, if any.
    fn lookup(&self, minion_id: &MinionId) -> Result<Option<KeyRecord>, KeyStoreError>;

    /// Register `public_key` for `minion_id` on first contact, or compare it
    /// with the stored key. Idempotent for an identical key; never overwrites
    /// a different one.
    fn propose(
        &self,
        minion_id: &MinionId,
        public_key: &PublicKeyPem,
    ) -> Result<ProposeOutcome, KeyStoreError>;

    /// Administrative state change. Entering `Accepted` stamps `last_accepted`.
    fn set_state(&self, minion_id: &MinionId, state: KeyState) -> Result<KeyRecord, KeyStoreError>;

    /// Remove the record so the next contact starts over.
    fn delete(&self, minion_id: &MinionId) -> Result<(), KeyStoreError>;
}

/// Operator-facing key management.
pub trait KeyAdminApi: KeyStoreApi {
    /// All records, sorted by minion ID.
    fn list_all(&self) -> Result<Vec<KeyRecord>, KeyStoreError>;

    /// Records in `state`, sorted by minion ID.
    fn list_by_state(&self, state: KeyState) -> Result<Vec<KeyRecord>, KeyStoreError> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|r| r.state == state)
            .collect())
    }

    /// Keys awaiting a decision.
    fn list_pending(&self) -> Result<Vec<KeyRecord>, KeyStoreError> {
        self.list_by_state(KeyState::Pending)
    }

    /// Trust the stored key.
    fn accept(&self, minion_id: &MinionId) -> Result<KeyRecord, KeyStoreError> {
        self.set_state(minion_id, KeyState::Accepted)
    }

    /// Refuse the stored key.
    fn reject(&self, minion_id: &MinionId) -> Result<KeyRecord, KeyStoreError> {
        self.set_state(minion_id, KeyState::Rejected)
    }

    /// Refuse the stored key and all further attempts.
    fn deny(&self, minion_id: &MinionId) -> Result<KeyRecord, KeyStoreError> {
        self.set_state(minion_id, KeyState::Denied)
    }

    /// SHA-256 fingerprint of the stored key's DER encoding.
    fn fingerprint(&self, minion_id: &MinionId) -> Result<String, KeyStoreError>;
}
