//! # Handshake State Machine
//!
//! Every step of a handshake is a transition of [`HandshakeState`] driven by
//! a [`HandshakeEvent`]. Any pairing not listed below ends in `Denied`.
//!
//! | From | Event | To |
//! |------|-------|----|
//! | `Connected` | `Claimed` | `IdentityClaimed` |
//! | `Connected` | `ClaimRefused` | `Denied` |
//! | `IdentityClaimed` | `KeyProposed(Existing \| Created)` | `KeyChecked` |
//! | `IdentityClaimed` | `KeyProposed(KeyMismatch)` | `Denied` |
//! | `KeyChecked` | `Evaluate` | by stored state |
//! | `Accepted` | `SignatureChecked` | `Accepted` (verified) or `Denied` |
//! | `Accepted` (verified) | `SessionOpened` | `SessionEstablished` |
//! | `PendingApproval` | `Rechecked` | by stored state |
//! | any | `Failed` | `Denied` |

use fm_01_key_store::ProposeOutcome;
use shared_types::{AuthStatus, KeyRecord, KeyState, MinionId, PublicKeyPem, SessionId};

/// Why a handshake was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyReason {
    /// Claimed ID failed the sanitizer.
    InvalidIdentity,
    /// Nonce unknown, reused or expired.
    ChallengeUnknown,
    /// Public key unparsable or too small.
    MalformedKey,
    /// Presented key differs from the stored key.
    KeyMismatch,
    /// Signature did not verify under the accepted key.
    SignatureInvalid,
    /// Stored key is in the `denied` state.
    KeyDenied,
    /// The record disappeared while the handshake was held.
    KeyRemoved,
    /// Event arrived in a state that does not accept it.
    InvalidTransition,
    /// Storage or crypto failure on the master.
    Internal,
}

impl DenyReason {
    /// Short machine-readable label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DenyReason::InvalidIdentity => "invalid_identity",
            DenyReason::ChallengeUnknown => "challenge_unknown",
            DenyReason::MalformedKey => "malformed_key",
            DenyReason::KeyMismatch => "key_mismatch",
            DenyReason::SignatureInvalid => "signature_invalid",
            DenyReason::KeyDenied => "key_denied",
            DenyReason::KeyRemoved => "key_removed",
            DenyReason::InvalidTransition => "invalid_transition",
            DenyReason::Internal => "internal",
        }
    }

    /// What the minion is told. `None` closes the connection silently.
    #[must_use]
    pub const fn response_status(&self) -> Option<AuthStatus> {
        match self {
            DenyReason::InvalidIdentity | DenyReason::Internal => None,
            _ => Some(AuthStatus::Denied),
        }
    }
}

/// Handshake progress of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    /// Challenge issued, waiting for `AUTH_REQUEST`.
    Connected,
    /// ID validated, challenge consumed, key parsed.
    IdentityClaimed {
        /// Sanitized ID.
        minion_id: MinionId,
        /// Presented key.
        public_key: PublicKeyPem,
    },
    /// Key store consulted; the record matches the presented key.
    KeyChecked {
        /// Stored record.
        record: KeyRecord,
    },
    /// The key is trusted.
    Accepted {
        /// Stored record.
        record: KeyRecord,
        /// Whether proof of possession has been checked.
        verified: bool,
    },
    /// The key awaits an operator.
    PendingApproval {
        /// Stored record.
        record: KeyRecord,
    },
    /// An operator rejected the key.
    Rejected {
        /// Minion concerned.
        minion_id: MinionId,
    },
    /// Session key delivered.
    SessionEstablished {
        /// Authenticated minion.
        minion_id: MinionId,
        /// The new session.
        session_id: SessionId,
    },
    /// Terminal refusal.
    Denied {
        /// Minion concerned, absent if the ID never validated.
        minion_id: Option<MinionId>,
        /// Why.
        reason: DenyReason,
    },
}

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeEvent {
    /// `AUTH_REQUEST` passed ID, challenge and key checks.
    Claimed {
        /// Sanitized ID.
        minion_id: MinionId,
        /// Presented key.
        public_key: PublicKeyPem,
    },
    /// `AUTH_REQUEST` failed a check.
    ClaimRefused(DenyReason),
    /// Key store answer to `propose`.
    KeyProposed(ProposeOutcome),
    /// Route on the stored key state.
    Evaluate,
    /// Result of the proof-of-possession check.
    SignatureChecked {
        /// Whether the signature verified.
        valid: bool,
    },
    /// Session registered and key sent.
    SessionOpened(SessionId),
    /// Record re-read while holding a pending handshake.
    Rechecked(Option<KeyRecord>),
    /// Internal failure.
    Failed,
}

impl HandshakeState {
    /// Apply `event`.
    #[must_use]
    pub fn on(self, event: HandshakeEvent) -> HandshakeState {
        use HandshakeEvent as E;
        use HandshakeState as S;

        match (self, event) {
            (S::Connected, E::Claimed { minion_id, public_key }) => {
                S::IdentityClaimed { minion_id, public_key }
            }
            (S::Connected, E::ClaimRefused(reason)) => S::Denied {
                minion_id: None,
                reason,
            },

            (
                S::IdentityClaimed { .. },
                E::KeyProposed(ProposeOutcome::Existing(record) | ProposeOutcome::Created(record)),
            ) => S::KeyChecked { record },
            (S::IdentityClaimed { minion_id, .. }, E::KeyProposed(ProposeOutcome::KeyMismatch(_))) => {
                deny(minion_id, DenyReason::KeyMismatch)
            }

            (S::KeyChecked { record }, E::Evaluate) => route(record),

            (S::Accepted { record, verified: false }, E::SignatureChecked { valid: true }) => {
                S::Accepted {
                    record,
                    verified: true,
                }
            }
            (S::Accepted { record, verified: false }, E::SignatureChecked { valid: false }) => {
                deny(record.minion_id, DenyReason::SignatureInvalid)
            }
            (S::Accepted { record, verified: true }, E::SessionOpened(session_id)) => {
                S::SessionEstablished {
                    minion_id: record.minion_id,
                    session_id,
                }
            }

            (S::PendingApproval { record }, E::Rechecked(Some(current))) => {
                if current.public_key != record.public_key {
                    deny(record.minion_id, DenyReason::KeyMismatch)
                } else {
                    route(current)
                }
            }
            (S::PendingApproval { record }, E::Rechecked(None)) => {
                deny(record.minion_id, DenyReason::KeyRemoved)
            }

            (state, E::Failed) => S::Denied {
                minion_id: state.minion_id().cloned(),
                reason: DenyReason::Internal,
            },
            (state, _) => S::Denied {
                minion_id: state.minion_id().cloned(),
                reason: DenyReason::InvalidTransition,
            },
        }
    }

    /// The minion this handshake is about, once known.
    #[must_use]
    pub fn minion_id(&self) -> Option<&MinionId> {
        match self {
            HandshakeState::Connected => None,
            HandshakeState::IdentityClaimed { minion_id, .. }
            | HandshakeState::Rejected { minion_id }
            | HandshakeState::SessionEstablished { minion_id, .. } => Some(minion_id),
            HandshakeState::KeyChecked { record }
            | HandshakeState::Accepted { record, .. }
            | HandshakeState::PendingApproval { record } => Some(&record.minion_id),
            HandshakeState::Denied { minion_id, .. } => minion_id.as_ref(),
        }
    }

    /// Whether no further transitions are possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HandshakeState::SessionEstablished { .. }
                | HandshakeState::Rejected { .. }
                | HandshakeState::Denied { .. }
        )
    }

    /// Status reported in `AUTH_RESPONSE`, if any.
    #[must_use]
    pub fn response_status(&self) -> Option<AuthStatus> {
        match self {
            HandshakeState::SessionEstablished { .. } => Some(AuthStatus::Accepted),
            HandshakeState::PendingApproval { .. } => Some(AuthStatus::Pending),
            HandshakeState::Rejected { .. } => Some(AuthStatus::Rejected),
            HandshakeState::Denied { reason, .. } => reason.response_status(),
            _ => None,
        }
    }

    /// State name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            HandshakeState::Connected => "connected",
            HandshakeState::IdentityClaimed { .. } => "identity_claimed",
            HandshakeState::KeyChecked { .. } => "key_checked",
            HandshakeState::Accepted { .. } => "accepted",
            HandshakeState::PendingApproval { .. } => "pending_approval",
            HandshakeState::Rejected { .. } => "rejected",
            HandshakeState::SessionEstablished { .. } => "session_established",
            HandshakeState::Denied { .. } => "denied",
        }
    }
}

fn deny(minion_id: MinionId, reason: DenyReason) -> HandshakeState {
    HandshakeState::Denied {
        minion_id: Some(minion_id),
        reason,
    }
}

fn route(record: KeyRecord) -> HandshakeState {
    match record.state {
        KeyState::Accepted => HandshakeState::Accepted {
            record,
            verified: false,
        },
        KeyState::Pending => HandshakeState::PendingApproval { record },
        KeyState::Rejected => HandshakeState::Rejected {
            minion_id: record.minion_id,
        },
        KeyState::Denied => deny(record.minion_id, DenyReason::KeyDenied),
    }
}
