//! One authenticated minion connection.

use crate::domain::errors::OutboxError;
use fm_03_secure_channel::ChannelState;
use shared_types::{MinionId, SessionId, Timestamp, WireMessage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// An established session.
///
/// The `MinionId` here is the one bound during the handshake. Nothing that
/// arrives later on the connection can change it.
pub struct Session {
    minion_id: MinionId,
    channel: Arc<ChannelState>,
    created_at: Timestamp,
    last_activity: AtomicU64,
    outbox: mpsc::Sender<WireMessage>,
    closed: watch::Sender<bool>,
}

impl Session {
    /// Create a session around an already-keyed channel.
    ///
    /// `outbox` feeds the connection's writer task.
    #[must_use]
    pub fn new(
        minion_id: MinionId,
        channel: Arc<ChannelState>,
        outbox: mpsc::Sender<WireMessage>,
        now: Timestamp,
    ) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            minion_id,
            channel,
            created_at: now,
            last_activity: AtomicU64::new(now.as_secs()),
            outbox,
            closed,
        }
    }

    /// Session identifier.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.channel.session_id()
    }

    /// The authenticated owner.
    #[must_use]
    pub fn minion_id(&self) -> &MinionId {
        &self.minion_id
    }

    /// Channel state used to seal and open frames.
    #[must_use]
    pub fn channel(&self) -> &Arc<ChannelState> {
        &self.channel
    }

    /// Establishment time.
    #[must_use]
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Last time traffic was seen.
    #[must_use]
    pub fn last_activity(&self) -> Timestamp {
        Timestamp::new(self.last_activity.load(Ordering::Relaxed))
    }

    /// Record activity.
    pub fn touch(&self, now: Timestamp) {
        self.last_activity.fetch_max(now.as_secs(), Ordering::Relaxed);
    }

    /// Revoke the channel and signal the connection to close. Idempotent.
    pub fn revoke(&self) {
        self.channel.revoke();
        self.closed.send_replace(true);
    }

    /// Whether the session was revoked.
    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.channel.is_revoked()
    }

    /// Resolves once the session is revoked.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // The sender lives as long as `self`, so `wait_for` only errors after drop.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Queue a message for the writer without waiting.
    ///
    /// # Errors
    ///
    /// `Closed` when revoked or the writer is gone, `Full` when the queue is
    /// at capacity.
    pub fn try_send(&self, message: WireMessage) -> Result<(), OutboxError> {
        if self.is_revoked() {
            return Err(OutboxError::Closed);
        }
        self.outbox.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => OutboxError::Full,
            mpsc::error::TrySendError::Closed(_) => OutboxError::Closed,
        })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id())
            .field("minion_id", &self.minion_id)
            .field("revoked", &self.is_revoked())
            .finish_non_exhaustive()
    }
}
