//! Per-session channel state.

use parking_lot::Mutex;
use shared_crypto::SecretKey;
use shared_types::SessionId;
use std::sync::atomic::{AtomicBool, Ordering};

/// Which way a frame travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Job publications.
    MasterToMinion,
    /// Job returns.
    MinionToMaster,
}

impl Direction {
    /// Nonce/AAD prefix distinguishing the two directions.
    #[must_use]
    pub const fn tag(self) -> [u8; 4] {
        match self {
            Direction::MasterToMinion => *b"m2n\0",
            Direction::MinionToMaster => *b"n2m\0",
        }
    }

    const fn index(self) -> usize {
        match self {
            Direction::MasterToMinion => 0,
            Direction::MinionToMaster => 1,
        }
    }
}

/// Key, counters and revocation flag of one session.
///
/// Shared by `Arc` between the connection task, the job bus and the session
/// registry. All counters are internally synchronized.
pub struct ChannelState {
    session_id: SessionId,
    key: SecretKey,
    revoked: AtomicBool,
    /// Last sequence sent, per direction.
    sent: [Mutex<u64>; 2],
    /// Last sequence accepted, per direction.
    accepted: [Mutex<u64>; 2],
}

impl ChannelState {
    /// Fresh state; both counters start at zero so the first frame is seq 1.
    #[must_use]
    pub fn new(session_id: SessionId, key: SecretKey) -> Self {
        Self {
            session_id,
            key,
            revoked: AtomicBool::new(false),
            sent: [Mutex::new(0), Mutex::new(0)],
            accepted: [Mutex::new(0), Mutex::new(0)],
        }
    }

    /// Session this state belongs to.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Mark revoked. Idempotent.
    pub fn revoke(&self) {
        self.revoked.store(true, Ordering::SeqCst);
    }

    /// Whether the channel was revoked.
    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::SeqCst)
    }

    /// Highest sequence accepted so far in `direction`.
    #[must_use]
    pub fn last_accepted(&self, direction: Direction) -> u64 {
        *self.accepted[direction.index()].lock()
    }

    pub(crate) fn key(&self) -> &SecretKey {
        &self.key
    }

    pub(crate) fn sent_counter(&self, direction: Direction) -> &Mutex<u64> {
        &self.sent[direction.index()]
    }

    pub(crate) fn accepted_counter(&self, direction: Direction) -> &Mutex<u64> {
        &self.accepted[direction.index()]
    }
}

impl std::fmt::Debug for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelState")
            .field("session_id", &self.session_id)
            .field("revoked", &self.is_revoked())
            .finish_non_exhaustive()
    }
}
