//! # Challenge Ledger
//!
//! Single-use, time-bounded record of issued challenge nonces.
//!
//! - A nonce is accepted at most once.
//! - A nonce older than the TTL is refused and forgotten.
//! - Expired entries are purged periodically and whenever the ledger fills
//!   up, which bounds memory.

use crate::domain::errors::ChallengeError;
use crate::domain::proof::NONCE_LEN;
use parking_lot::Mutex;
use rand::RngCore;
use shared_types::Timestamp;
use std::collections::HashMap;

/// Outstanding challenges.
pub struct ChallengeLedger {
    issued: Mutex<HashMap<[u8; NONCE_LEN], Timestamp>>,
    ttl_secs: u64,
    max_outstanding: usize,
}

impl ChallengeLedger {
    /// Ledger whose challenges live `ttl_secs`.
    #[must_use]
    pub fn new(ttl_secs: u64, max_outstanding: usize) -> Self {
        Self {
            issued: Mutex::new(HashMap::new()),
            ttl_secs,
            max_outstanding,
        }
    }

    /// Issue and record a fresh random nonce.
    ///
    /// # Errors
    ///
    /// `Exhausted` if the ledger is full of live challenges.
    pub fn issue(&self, now: Timestamp) -> Result<[u8; NONCE_LEN], ChallengeError> {
        let mut issued = self.issued.lock();
        if issued.len() >= self.max_outstanding {
            Self::purge_locked(&mut issued, now, self.ttl_secs);
            if issued.len() >= self.max_outstanding {
                return Err(ChallengeError::Exhausted);
            }
        }

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        issued.insert(nonce, now);
        Ok(nonce)
    }

    /// Consume a nonce. Succeeds once per issued, unexpired nonce.
    ///
    /// # Errors
    ///
    /// `Unknown` if never issued or already consumed, `Expired` if too old.
    pub fn consume(&self, nonce: &[u8], now: Timestamp) -> Result<(), ChallengeError> {
        let key: [u8; NONCE_LEN] = nonce.try_into().map_err(|_| ChallengeError::Unknown)?;
        let issued_at = self
            .issued
            .lock()
            .remove(&key)
            .ok_or(ChallengeError::Unknown)?;

        if now.saturating_elapsed_since(issued_at) > self.ttl_secs {
            return Err(ChallengeError::Expired);
        }
        Ok(())
    }

    /// Drop a nonce without using it (connection closed early).
    pub fn forget(&self, nonce: &[u8; NONCE_LEN]) {
        self.issued.lock().remove(nonce);
    }

    /// Remove expired challenges. Returns how many were removed.
    pub fn purge_expired(&self, now: Timestamp) -> usize {
        Self::purge_locked(&mut self.issued.lock(), now, self.ttl_secs)
    }

    /// Number of outstanding challenges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.issued.lock().len()
    }

    /// Whether no challenges are outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge_locked(
        issued: &mut HashMap<[u8; NONCE_LEN], Timestamp>,
        now: Timestamp,
        ttl_secs: u64,
    ) -> usize {
        let before = issued.len();
        issued.retain(|_, at| now.saturating_elapsed_since(*at) <= ttl_secs);
        before - issued.len()
    }
}
