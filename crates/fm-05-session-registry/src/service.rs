//! # Session Registry Service

use crate::domain::session::Session;
use parking_lot::RwLock;
use shared_types::{MinionId, SessionId, TimeSource};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Default)]
struct Inner {
    by_minion: HashMap<MinionId, Arc<Session>>,
    by_session: HashMap<SessionId, MinionId>,
}

impl Inner {
    fn remove(&mut self, minion_id: &MinionId) -> Option<Arc<Session>> {
        let session = self.by_minion.remove(minion_id)?;
        self.by_session.remove(&session.session_id());
        Some(session)
    }
}

/// One live session per minion ID.
///
/// Both indexes are updated under a single lock, so `lookup` and
/// `lookup_session` never disagree about which session is current.
pub struct SessionRegistry {
    inner: RwLock<Inner>,
    time_source: Arc<dyn TimeSource>,
}

impl SessionRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new(time_source: Arc<dyn TimeSource>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            time_source,
        }
    }

    /// Make `session` the current session of its minion.
    ///
    /// Returns the session it replaced, already revoked.
    pub fn register(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        let minion_id = session.minion_id().clone();
        let session_id = session.session_id();

        let replaced = {
            let mut inner = self.inner.write();
            let replaced = inner.remove(&minion_id);
            inner.by_session.insert(session_id, minion_id.clone());
            inner.by_minion.insert(minion_id.clone(), session);
            replaced
        };

        if let Some(old) = &replaced {
            old.revoke();
            info!(
                minion = %minion_id,
                old_session = %old.session_id(),
                new_session = %session_id,
                "[fm-05] Session replaced"
            );
        } else {
            debug!(minion = %minion_id, session = %session_id, "[fm-05] Session registered");
        }
        replaced
    }

    /// Current session of a minion.
    #[must_use]
    pub fn lookup(&self, minion_id: &MinionId) -> Option<Arc<Session>> {
        self.inner.read().by_minion.get(minion_id).cloned()
    }

    /// Session by ID, only while it is the current one for its minion.
    #[must_use]
    pub fn lookup_session(&self, session_id: SessionId) -> Option<Arc<Session>> {
        let inner = self.inner.read();
        let minion_id = inner.by_session.get(&session_id)?;
        inner.by_minion.get(minion_id).cloned()
    }

    /// Revoke and remove a minion's session. Returns whether one existed.
    pub fn revoke(&self, minion_id: &MinionId) -> bool {
        let removed = self.inner.write().remove(minion_id);
        match removed {
            Some(session) => {
                session.revoke();
                info!(minion = %minion_id, session = %session.session_id(), "[fm-05] Session revoked");
                true
            }
            None => false,
        }
    }

    /// Remove `session_id` if it is still current for `minion_id`.
    ///
    /// Used on disconnect, where a newer session must not be evicted by the
    /// old connection's cleanup.
    pub fn remove_if_current(&self, minion_id: &MinionId, session_id: SessionId) -> bool {
        let removed = {
            let mut inner = self.inner.write();
            let is_current = inner
                .by_minion
                .get(minion_id)
                .is_some_and(|s| s.session_id() == session_id);
            if is_current {
                inner.remove(minion_id)
            } else {
                None
            }
        };
        match removed {
            Some(session) => {
                session.revoke();
                true
            }
            None => false,
        }
    }

    /// Revoke sessions idle for at least `idle_timeout_secs`.
    pub fn sweep(&self, idle_timeout_secs: u64) -> Vec<MinionId> {
        let now = self.time_source.now();
        let expired: Vec<Arc<Session>> = {
            let mut inner = self.inner.write();
            let idle: Vec<MinionId> = inner
                .by_minion
                .iter()
                .filter(|(_, s)| now.saturating_elapsed_since(s.last_activity()) >= idle_timeout_secs)
                .map(|(id, _)| id.clone())
                .collect();
            idle.iter().filter_map(|id| inner.remove(id)).collect()
        };

        expired
            .into_iter()
            .map(|session| {
                session.revoke();
                info!(minion = %session.minion_id(), "[fm-05] Idle session swept");
                session.minion_id().clone()
            })
            .collect()
    }

    /// Snapshot of all current sessions.
    #[must_use]
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.inner.read().by_minion.values().cloned().collect()
    }

    /// Number of current sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().by_minion.len()
    }

    /// Whether no sessions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clock used for sweeps and activity stamps.
    #[must_use]
    pub fn time_source(&self) -> &Arc<dyn TimeSource> {
        &self.time_source
    }
}
