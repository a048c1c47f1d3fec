//! # Minion Client
//!
//! The minion side of the protocol: answer the challenge, unwrap the session
//! key, then open job publications and seal results.
//!
//! Execution itself is delegated to a [`JobExecutor`]; the client only ever
//! hands it payloads that decrypted under the session key and name the JID
//! they were published under.

use std::sync::Arc;

use async_trait::async_trait;
use fm_02_auth_handshake::challenge_message;
use fm_03_secure_channel::{ChannelError, ChannelState, Direction, SecureChannel};
use shared_crypto::{CryptoError, RsaKeyPair, SecretKey};
use shared_types::{
    AuthStatus, IdentityError, JobId, JobPayload, JobResult, MinionId, SealedFrame, SessionId,
    WireMessage, MAX_FRAME_LEN,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use crate::transport::{read_message, write_message, FrameError};

/// Runs a decrypted job on the minion.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Execute `payload` as `minion_id`.
    async fn execute(&self, minion_id: &MinionId, payload: JobPayload) -> JobResult;
}

/// Minion-side failures.
#[derive(Debug, Error)]
pub enum MinionError {
    /// Framing or socket failure.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The master closed the connection. An invalid ID ends this way, since
    /// the master sends no response to it.
    #[error("Connection closed by master")]
    Closed,

    /// The master sent a message that does not fit the protocol step.
    #[error("Unexpected message: expected {expected}, got {got}")]
    Unexpected {
        /// What the step expected.
        expected: &'static str,
        /// What arrived.
        got: &'static str,
    },

    /// The handshake ended without a session.
    #[error("Authentication not accepted: {0:?}")]
    NotAccepted(AuthStatus),

    /// Key handling failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The master accepted an ID the local sanitizer refuses.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// A job frame did not open.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The sealed payload names a different job than its envelope.
    #[error("Payload for job {payload} arrived as job {envelope}")]
    JobMismatch {
        /// JID on the `JOB_PUBLISH` envelope.
        envelope: JobId,
        /// JID inside the sealed payload.
        payload: JobId,
    },
}

/// Connects a minion identity to a master.
pub struct MinionClient {
    raw_id: String,
    keypair: Arc<RsaKeyPair>,
    max_frame_len: usize,
    wait_while_pending: bool,
}

impl MinionClient {
    /// `raw_id` is sent as-is; the master decides whether it is valid.
    pub fn new(raw_id: impl Into<String>, keypair: Arc<RsaKeyPair>) -> Self {
        Self {
            raw_id: raw_id.into(),
            keypair,
            max_frame_len: MAX_FRAME_LEN,
            wait_while_pending: false,
        }
    }

    /// Keep the connection open after a `pending` response and wait for
    /// the master's final answer. Requires `pending_hold` on the master.
    #[must_use]
    pub fn wait_while_pending(mut self, wait: bool) -> Self {
        self.wait_while_pending = wait;
        self
    }

    /// The ID this client claims.
    #[must_use]
    pub fn raw_id(&self) -> &str {
        &self.raw_id
    }

    /// Run the handshake over `stream`.
    ///
    /// # Errors
    ///
    /// `NotAccepted` for a pending, rejected or denied key, `Closed` when the
    /// master hangs up without answering.
    pub async fn connect<S>(&self, mut stream: S) -> Result<MinionConnection<S>, MinionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let nonce = match read_message(&mut stream, self.max_frame_len).await? {
            Some(WireMessage::Challenge { nonce }) => nonce,
            Some(other) => return Err(unexpected("CHALLENGE", &other)),
            None => return Err(MinionError::Closed),
        };

        let request = WireMessage::AuthRequest {
            raw_id: self.raw_id.clone(),
            public_key_pem: self.keypair.public_key().to_pem()?,
            signature: self.keypair.sign(&challenge_message(&nonce, &self.raw_id)),
            nonce,
        };
        write_message(&mut stream, &request, self.max_frame_len).await?;

        loop {
            let (status, session_id, wrapped) = match read_message(&mut stream, self.max_frame_len).await? {
                Some(WireMessage::AuthResponse {
                    status,
                    session_id,
                    encrypted_session_key,
                }) => (status, session_id, encrypted_session_key),
                Some(other) => return Err(unexpected("AUTH_RESPONSE", &other)),
                None => return Err(MinionError::Closed),
            };

            match (status, session_id, wrapped) {
                (AuthStatus::Accepted, Some(session_id), Some(wrapped)) => {
                    let key = SecretKey::from_slice(&self.keypair.unwrap_key(&wrapped)?)?;
                    let minion_id = MinionId::parse(&self.raw_id)?;
                    info!(minion = %minion_id, session = %session_id, "Authenticated with master");
                    return Ok(MinionConnection {
                        minion_id,
                        session_id,
                        channel: ChannelState::new(session_id, key),
                        stream,
                        max_frame_len: self.max_frame_len,
                    });
                }
                (AuthStatus::Accepted, _, _) => {
                    return Err(MinionError::Unexpected {
                        expected: "session key",
                        got: "AUTH_RESPONSE without key",
                    })
                }
                (AuthStatus::Pending, _, _) if self.wait_while_pending => {
                    debug!(raw_id = %self.raw_id, "Key pending, waiting for operator");
                }
                (status, _, _) => return Err(MinionError::NotAccepted(status)),
            }
        }
    }
}

/// An authenticated connection.
pub struct MinionConnection<S> {
    minion_id: MinionId,
    session_id: SessionId,
    channel: ChannelState,
    stream: S,
    max_frame_len: usize,
}

impl<S> MinionConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Our validated ID.
    #[must_use]
    pub fn minion_id(&self) -> &MinionId {
        &self.minion_id
    }

    /// Session assigned by the master.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Channel state, for inspecting sequence counters.
    #[must_use]
    pub fn channel(&self) -> &ChannelState {
        &self.channel
    }

    /// Wait for the next job. `Ok(None)` when the master closes the
    /// connection.
    pub async fn next_job(&mut self) -> Result<Option<JobPayload>, MinionError> {
        let (jid, frame) = match read_message(&mut self.stream, self.max_frame_len).await? {
            Some(WireMessage::JobPublish { jid, frame }) => (jid, frame),
            Some(other) => return Err(unexpected("JOB_PUBLISH", &other)),
            None => return Ok(None),
        };

        let payload: JobPayload =
            SecureChannel::open_json(&self.channel, Direction::MasterToMinion, &frame)?;
        if payload.jid != jid {
            return Err(MinionError::JobMismatch {
                envelope: jid,
                payload: payload.jid,
            });
        }
        Ok(Some(payload))
    }

    /// Seal and send a result. Returns the frame that was sent.
    pub async fn send_return(&mut self, jid: &JobId, result: &JobResult) -> Result<SealedFrame, MinionError> {
        let frame = SecureChannel::seal_json(&self.channel, Direction::MinionToMaster, result)?;
        self.send_frame(jid, frame.clone()).await?;
        Ok(frame)
    }

    /// Send an already sealed frame.
    pub async fn send_frame(&mut self, jid: &JobId, frame: SealedFrame) -> Result<(), MinionError> {
        let message = WireMessage::JobReturn {
            jid: jid.clone(),
            frame,
        };
        write_message(&mut self.stream, &message, self.max_frame_len).await?;
        Ok(())
    }

    /// Execute jobs until the master closes the connection.
    ///
    /// Returns the number of jobs run.
    pub async fn run(mut self, executor: &dyn JobExecutor) -> Result<usize, MinionError> {
        let mut handled = 0;
        while let Some(payload) = self.next_job().await? {
            let jid = payload.jid.clone();
            debug!(minion = %self.minion_id, jid = %jid, fun = %payload.fun, "Executing job");
            let result = executor.execute(&self.minion_id, payload).await;
            self.send_return(&jid, &result).await?;
            handled += 1;
        }
        Ok(handled)
    }
}

fn unexpected(expected: &'static str, got: &WireMessage) -> MinionError {
    MinionError::Unexpected {
        expected,
        got: got.name(),
    }
}
