//! # Master Events
//!
//! Every event that flows through the shared bus.

use serde::{Deserialize, Serialize};
use shared_types::{JobId, KeyState, MinionId, SessionId};

/// All events that can be published to the event bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MasterEvent {
    // =========================================================================
    // SUBSYSTEM 2: AUTH HANDSHAKE
    // =========================================================================
    /// A minion presented a key; `state` is the stored state afterwards.
    KeyProposed {
        /// Claimed (and validated) minion ID.
        minion_id: MinionId,
        /// State of the stored record.
        state: KeyState,
    },

    /// A handshake ended in a session.
    AuthAccepted {
        /// Authenticated minion.
        minion_id: MinionId,
        /// The new session.
        session_id: SessionId,
    },

    /// A handshake was refused.
    AuthDenied {
        /// Minion ID, absent when the claimed ID failed validation.
        minion_id: Option<MinionId>,
        /// Short machine-readable reason (`key_mismatch`, `signature_invalid`, ...).
        reason: String,
    },

    /// A handshake is waiting on operator approval.
    PendingApproval {
        /// Minion whose key is pending.
        minion_id: MinionId,
    },

    // =========================================================================
    // SUBSYSTEM 5: SESSION REGISTRY
    // =========================================================================
    /// A session was revoked (replaced, idle, disconnected or by an operator).
    SessionRevoked {
        /// Owner of the session.
        minion_id: MinionId,
        /// The revoked session.
        session_id: SessionId,
        /// Why it was revoked.
        reason: String,
    },

    // =========================================================================
    // SUBSYSTEM 4: JOB BUS
    // =========================================================================
    /// A job was sealed and enqueued for its recipients.
    JobPublished {
        /// Job identifier.
        jid: JobId,
        /// Function name.
        fun: String,
        /// Minions the job was delivered to.
        recipients: Vec<MinionId>,
    },

    /// A minion's return was accepted and stored.
    ReturnReceived {
        /// Job identifier.
        jid: JobId,
        /// Authenticated submitter.
        minion_id: MinionId,
        /// Whether execution succeeded.
        success: bool,
    },

    /// A job stopped being tracked (all returns in, or timed out).
    JobCompleted {
        /// Job identifier.
        jid: JobId,
        /// Expected recipients that never returned.
        missing: Vec<MinionId>,
    },
}

impl MasterEvent {
    /// Get the topic for this event (for filtering).
    #[must_use]
    pub fn topic(&self) -> EventTopic {
        match self {
            Self::KeyProposed { .. } => EventTopic::Keys,
            Self::AuthAccepted { .. } | Self::AuthDenied { .. } | Self::PendingApproval { .. } => {
                EventTopic::Auth
            }
            Self::SessionRevoked { .. } => EventTopic::Sessions,
            Self::JobPublished { .. }
            | Self::ReturnReceived { .. }
            | Self::JobCompleted { .. } => EventTopic::Jobs,
        }
    }

    /// Get the originating subsystem ID.
    #[must_use]
    pub fn source_subsystem(&self) -> u8 {
        match self {
            Self::KeyProposed { .. }
            | Self::AuthAccepted { .. }
            | Self::AuthDenied { .. }
            | Self::PendingApproval { .. } => 2,
            Self::JobPublished { .. }
            | Self::ReturnReceived { .. }
            | Self::JobCompleted { .. } => 4,
            Self::SessionRevoked { .. } => 5,
        }
    }

    /// Slash-separated tag used when events are archived.
    #[must_use]
    pub fn tag(&self) -> String {
        match self {
            Self::KeyProposed { minion_id, .. } => format!("fm/key/{minion_id}/proposed"),
            Self::AuthAccepted { minion_id, .. } => format!("fm/auth/{minion_id}/accepted"),
            Self::AuthDenied { .. } => "fm/auth/denied".to_string(),
            Self::PendingApproval { minion_id } => format!("fm/auth/{minion_id}/pending"),
            Self::SessionRevoked { minion_id, .. } => format!("fm/session/{minion_id}/revoked"),
            Self::JobPublished { jid, .. } => format!("fm/job/{jid}/new"),
            Self::ReturnReceived { jid, minion_id, .. } => format!("fm/job/{jid}/ret/{minion_id}"),
            Self::JobCompleted { jid, .. } => format!("fm/job/{jid}/complete"),
        }
    }
}

/// Event topics for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTopic {
    /// Key proposals.
    Keys,
    /// Handshake outcomes.
    Auth,
    /// Session lifecycle.
    Sessions,
    /// Job publication and returns.
    Jobs,
    /// All events (no filtering).
    All,
}

/// Filter for subscribing to specific events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Topics to include. Empty means all topics.
    pub topics: Vec<EventTopic>,
}

impl EventFilter {
    /// Create a filter that accepts all events.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Create a filter for specific topics.
    #[must_use]
    pub fn topics(topics: Vec<EventTopic>) -> Self {
        Self { topics }
    }

    /// Check if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &MasterEvent) -> bool {
        self.topics.is_empty()
            || self.topics.contains(&EventTopic::All)
            || self.topics.contains(&event.topic())
    }
}
