//! # Auth Service
//!
//! Drives one handshake per connection through the state machine:
//!
//! 1. `begin` issues the challenge.
//! 2. `process` validates the `AUTH_REQUEST`, consults the key store and
//!    either establishes a session, holds the attempt as pending, or refuses.
//! 3. `recheck` re-reads the record of a held attempt.
//!
//! Every `AUTH_RESPONSE` is written to the connection's outbox here, so an
//! accepted minion always receives its session key before any job frame.
//! Key store calls fsync, so they run on the blocking pool.

use crate::domain::challenge::ChallengeLedger;
use crate::domain::config::AuthConfig;
use crate::domain::errors::{AuthError, ChallengeError};
use crate::domain::proof::{challenge_message, NONCE_LEN};
use crate::domain::state::{HandshakeEvent, HandshakeState};
use fm_01_key_store::{KeyStoreApi, KeyStoreError, ProposeOutcome};
use fm_03_secure_channel::ChannelState;
use fm_05_session_registry::{Session, SessionRegistry};
use shared_bus::{EventPublisher, MasterEvent};
use shared_crypto::{RsaPublicKey, SecretKey};
use shared_types::{
    log_preview, AuthStatus, KeyRecord, MinionId, PublicKeyPem, SessionId, TimeSource,
    WireMessage,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};


// =============================================================================
// REQUEST / OUTCOME TYPES
// =============================================================================

/// Decoded `AUTH_REQUEST`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    /// Minion-supplied ID, not yet validated.
    pub raw_id: String,
    /// SubjectPublicKeyInfo PEM.
    pub public_key_pem: String,
    /// Echoed challenge nonce.
    pub nonce: Vec<u8>,
    /// RSA-PSS signature over [`challenge_message`].
    pub signature: Vec<u8>,
}

impl AuthRequest {
    /// Extract the request from a wire message, if it is one.
    #[must_use]
    pub fn from_message(message: WireMessage) -> Option<Self> {
        match message {
            WireMessage::AuthRequest {
                raw_id,
                public_key_pem,
                nonce,
                signature,
            } => Some(Self {
                raw_id,
                public_key_pem,
                nonce,
                signature,
            }),
            _ => None,
        }
    }
}

/// A handshake in the `Connected` state.
#[derive(Debug)]
pub struct Handshake {
    nonce: [u8; NONCE_LEN],
    state: HandshakeState,
}

impl Handshake {
    /// The `CHALLENGE` message to send.
    #[must_use]
    pub fn challenge(&self) -> WireMessage {
        WireMessage::Challenge {
            nonce: self.nonce.to_vec(),
        }
    }

    /// The issued nonce.
    #[must_use]
    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &HandshakeState {
        &self.state
    }
}

/// What the minion proved in its `AUTH_REQUEST`. Kept so a held attempt can
/// be verified once an operator accepts the key.
struct Proof {
    raw_id: String,
    nonce: Vec<u8>,
    signature: Vec<u8>,
    key: RsaPublicKey,
}

/// A handshake held in `PendingApproval`.
pub struct PendingHandshake {
    minion_id: MinionId,
    state: HandshakeState,
    proof: Proof,
}

impl PendingHandshake {
    /// Minion awaiting approval.
    #[must_use]
    pub fn minion_id(&self) -> &MinionId {
        &self.minion_id
    }

    /// Current state (always `PendingApproval`).
    #[must_use]
    pub fn state(&self) -> &HandshakeState {
        &self.state
    }
}

impl std::fmt::Debug for PendingHandshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingHandshake")
            .field("state", &self.state.name())
            .field("minion_id", &self.minion_id)
            .field("key", &self.proof.key)
            .finish_non_exhaustive()
    }
}

/// How a handshake step ended.
#[derive(Debug)]
pub enum AuthOutcome {
    /// Session registered; the accepted response is already queued.
    Established {
        /// The new session.
        session: Arc<Session>,
    },
    /// Key awaits an operator. The runtime may hold the connection and
    /// call [`AuthService::recheck`], or drop it.
    Pending {
        /// State to resume from.
        hold: PendingHandshake,
    },
    /// Terminal refusal. Any response has already been queued.
    Refused {
        /// Final state (`Rejected` or `Denied`).
        state: HandshakeState,
    },
}

impl AuthOutcome {
    /// Final or current handshake state name, for logs.
    #[must_use]
    pub fn state_name(&self) -> &'static str {
        match self {
            AuthOutcome::Established { .. } => "session_established",
            AuthOutcome::Pending { hold } => hold.state.name(),
            AuthOutcome::Refused { state } => state.name(),
        }
    }
}

// =============================================================================
// SERVICE
// =============================================================================

/// Master side of the authentication handshake.
pub struct AuthService {
    keys: Arc<dyn KeyStoreApi>,
    sessions: Arc<SessionRegistry>,
    events: Arc<dyn EventPublisher>,
    challenges: ChallengeLedger,
    config: AuthConfig,
    time_source: Arc<dyn TimeSource>,
}

impl AuthService {
    /// Create a new auth service.
    pub fn new(
        keys: Arc<dyn KeyStoreApi>,
        sessions: Arc<SessionRegistry>,
        events: Arc<dyn EventPublisher>,
        config: AuthConfig,
        time_source: Arc<dyn TimeSource>,
    ) -> Self {
        let challenges = ChallengeLedger::new(
            config.handshake_timeout.as_secs(),
            config.max_outstanding_challenges,
        );
        Self {
            keys,
            sessions,
            events,
            challenges,
            config,
            time_source,
        }
    }

    /// Handshake settings.
    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Start a handshake for a new connection.
    ///
    /// # Errors
    ///
    /// `Challenge(Exhausted)` when too many handshakes are in flight.
    pub fn begin(&self) -> Result<Handshake, AuthError> {
        let nonce = self.challenges.issue(self.time_source.now())?;
        Ok(Handshake {
            nonce,
            state: HandshakeState::Connected,
        })
    }

    /// Give up on a handshake that never produced an `AUTH_REQUEST`.
    pub fn abandon(&self, handshake: Handshake) {
        self.challenges.forget(&handshake.nonce);
    }

    /// Drop expired challenges. Returns how many were removed.
    pub fn purge_expired_challenges(&self) -> usize {
        self.challenges.purge_expired(self.time_source.now())
    }

    /// Number of challenges awaiting an answer.
    #[must_use]
    pub fn outstanding_challenges(&self) -> usize {
        self.challenges.len()
    }

    async fn on_keys<T, F>(&self, op: F) -> Result<T, AuthError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn KeyStoreApi) -> Result<T, KeyStoreError> + Send + 'static,
    {
        let keys = Arc::clone(&self.keys);
        tokio::task::spawn_blocking(move || op(keys.as_ref()))
            .await
            .map_err(|e| KeyStoreError::Storage(format!("key store task failed: {e}")))?
            .map_err(AuthError::from)
    }

    /// Handle the minion's `AUTH_REQUEST`.
    ///
    /// Responses go to `outbox`; a refused invalid identity gets none.
    pub async fn process(
        &self,
        handshake: Handshake,
        request: AuthRequest,
        outbox: &mpsc::Sender<WireMessage>,
    ) -> AuthOutcome {
        let Handshake { nonce, state } = handshake;

        let (minion_id, key, public_key) = match self.claim(&nonce, &request) {
            Ok(claim) => claim,
            Err(e) => {
                self.challenges.forget(&nonce);
                warn!(
                    raw_id = %log_preview(&request.raw_id),
                    error = %e,
                    "[fm-02] Identity claim refused"
                );
                let state = state.on(HandshakeEvent::ClaimRefused(e.deny_reason()));
                return self.refuse(state, outbox).await;
            }
        };

        let state = state.on(HandshakeEvent::Claimed {
            minion_id: minion_id.clone(),
            public_key: public_key.clone(),
        });

        let (proposed_id, proposed_key) = (minion_id.clone(), public_key.clone());
        let outcome = match self
            .on_keys(move |keys| keys.propose(&proposed_id, &proposed_key))
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return self.fail(state, e, outbox).await,
        };

        match &outcome {
            ProposeOutcome::Created(record) => {
                info!(minion = %minion_id, state = %record.state, "[fm-02] New minion key recorded");
                self.events
                    .publish(MasterEvent::KeyProposed {
                        minion_id: minion_id.clone(),
                        state: record.state,
                    })
                    .await;
            }
            ProposeOutcome::KeyMismatch(_) => {
                warn!(minion = %minion_id, "[fm-02] Presented key differs from stored key");
            }
            ProposeOutcome::Existing(_) => {}
        }

        let state = state
            .on(HandshakeEvent::KeyProposed(outcome))
            .on(HandshakeEvent::Evaluate);

        let proof = Proof {
            raw_id: request.raw_id,
            nonce: nonce.to_vec(),
            signature: request.signature,
            key,
        };

        match state {
            HandshakeState::Accepted { .. } => self.establish(state, proof, outbox).await,
            HandshakeState::PendingApproval { .. } => self.hold(state, proof, outbox).await,
            other => self.refuse(other, outbox).await,
        }
    }

    /// Re-read the key record of a held attempt.
    ///
    /// Still pending: returns `Pending` without writing anything. Accepted
    /// since: resumes at signature verification. Anything else is terminal.
    pub async fn recheck(
        &self,
        hold: PendingHandshake,
        outbox: &mpsc::Sender<WireMessage>,
    ) -> AuthOutcome {
        let PendingHandshake {
            minion_id,
            state,
            proof,
        } = hold;

        let lookup_id = minion_id.clone();
        let current = match self.on_keys(move |keys| keys.lookup(&lookup_id)).await {
            Ok(record) => record,
            Err(e) => return self.fail(state, e, outbox).await,
        };

        match state.on(HandshakeEvent::Rechecked(current)) {
            state @ HandshakeState::PendingApproval { .. } => AuthOutcome::Pending {
                hold: PendingHandshake {
                    minion_id,
                    state,
                    proof,
                },
            },
            state @ HandshakeState::Accepted { .. } => {
                info!(minion = %minion_id, "[fm-02] Held minion accepted, resuming handshake");
                self.establish(state, proof, outbox).await
            }
            other => self.refuse(other, outbox).await,
        }
    }

    // =========================================================================
    // STEPS
    // =========================================================================

    /// Sanitize the ID, consume the challenge and parse the key.
    fn claim(
        &self,
        nonce: &[u8; NONCE_LEN],
        request: &AuthRequest,
    ) -> Result<(MinionId, RsaPublicKey, PublicKeyPem), AuthError> {
        let minion_id = MinionId::parse(&request.raw_id)?;

        if request.nonce.as_slice() != nonce.as_slice() {
            return Err(ChallengeError::Unknown.into());
        }
        self.challenges.consume(nonce, self.time_source.now())?;

        let malformed = |e: shared_crypto::CryptoError| AuthError::MalformedKey(e.to_string());
        let key = RsaPublicKey::from_pem(&request.public_key_pem).map_err(malformed)?;
        key.ensure_min_bits(self.config.min_rsa_bits)
            .map_err(malformed)?;
        // Stored in canonical encoding so equal keys always compare equal.
        let pem = key.to_pem().map_err(malformed)?;

        Ok((minion_id, key, PublicKeyPem::new(&pem)))
    }

    async fn establish(
        &self,
        state: HandshakeState,
        proof: Proof,
        outbox: &mpsc::Sender<WireMessage>,
    ) -> AuthOutcome {
        let message = challenge_message(&proof.nonce, &proof.raw_id);
        let valid = proof.key.verify(&message, &proof.signature).is_ok();

        let state = state.on(HandshakeEvent::SignatureChecked { valid });
        let minion_id = match &state {
            HandshakeState::Accepted {
                record: KeyRecord { minion_id, .. },
                verified: true,
            } => minion_id.clone(),
            _ => {
                warn!(
                    minion = ?state.minion_id(),
                    "[fm-02] Signature did not verify under the accepted key"
                );
                return self.refuse(state, outbox).await;
            }
        };

        let session_key = SecretKey::generate();
        let wrapped = match proof.key.wrap_key(session_key.as_bytes()) {
            Ok(wrapped) => wrapped,
            Err(e) => return self.fail(state, AuthError::Crypto(e.to_string()), outbox).await,
        };

        let session_id = SessionId::generate();
        let channel = Arc::new(ChannelState::new(session_id, session_key));
        let session = Arc::new(Session::new(
            minion_id.clone(),
            channel,
            outbox.clone(),
            self.time_source.now(),
        ));

        let response = WireMessage::AuthResponse {
            status: AuthStatus::Accepted,
            session_id: Some(session_id),
            encrypted_session_key: Some(wrapped),
        };
        if outbox.send(response).await.is_err() {
            debug!(minion = %minion_id, "[fm-02] Connection closed before session key delivery");
            return self.fail(state, AuthError::ConnectionClosed, outbox).await;
        }

        let state = state.on(HandshakeEvent::SessionOpened(session_id));
        debug!(minion = %minion_id, state = state.name(), "[fm-02] Handshake complete");

        if let Some(old) = self.sessions.register(Arc::clone(&session)) {
            self.events
                .publish(MasterEvent::SessionRevoked {
                    minion_id: minion_id.clone(),
                    session_id: old.session_id(),
                    reason: "replaced".into(),
                })
                .await;
        }

        info!(minion = %minion_id, session = %session_id, "[fm-02] Session established");
        self.events
            .publish(MasterEvent::AuthAccepted {
                minion_id,
                session_id,
            })
            .await;

        AuthOutcome::Established { session }
    }

    async fn hold(
        &self,
        state: HandshakeState,
        proof: Proof,
        outbox: &mpsc::Sender<WireMessage>,
    ) -> AuthOutcome {
        let Some(minion_id) = state.minion_id().cloned() else {
            return self.refuse(state.on(HandshakeEvent::Failed), outbox).await;
        };
        info!(minion = %minion_id, "[fm-02] Key pending operator approval");

        let _ = outbox
            .send(WireMessage::AuthResponse {
                status: AuthStatus::Pending,
                session_id: None,
                encrypted_session_key: None,
            })
            .await;

        self.events
            .publish(MasterEvent::PendingApproval {
                minion_id: minion_id.clone(),
            })
            .await;

        AuthOutcome::Pending {
            hold: PendingHandshake {
                minion_id,
                state,
                proof,
            },
        }
    }

    /// End the attempt, answering with the state's status if it has one.
    async fn refuse(
        &self,
        state: HandshakeState,
        outbox: &mpsc::Sender<WireMessage>,
    ) -> AuthOutcome {
        let reason = match &state {
            HandshakeState::Denied { reason, .. } => reason.as_str(),
            HandshakeState::Rejected { .. } => "rejected",
            other => other.name(),
        };
        warn!(minion = ?state.minion_id(), reason, "[fm-02] Handshake refused");

        if let Some(status) = state.response_status() {
            let _ = outbox
                .send(WireMessage::AuthResponse {
                    status,
                    session_id: None,
                    encrypted_session_key: None,
                })
                .await;
        }

        self.events
            .publish(MasterEvent::AuthDenied {
                minion_id: state.minion_id().cloned(),
                reason: reason.to_owned(),
            })
            .await;

        AuthOutcome::Refused { state }
    }

    /// Internal failure: the connection is closed without a response.
    async fn fail(
        &self,
        state: HandshakeState,
        error: AuthError,
        outbox: &mpsc::Sender<WireMessage>,
    ) -> AuthOutcome {
        warn!(minion = ?state.minion_id(), error = %error, "[fm-02] Handshake aborted");
        self.refuse(state.on(HandshakeEvent::Failed), outbox).await
    }
}
