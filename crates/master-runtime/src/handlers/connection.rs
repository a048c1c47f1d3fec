//! # Connection Handler
//!
//! One instance per accepted minion connection.
//!
//! ```text
//! accept ─→ CHALLENGE ─→ AUTH_REQUEST ─→ AuthService::process
//!                                            │
//!          ┌──────────────┬──────────────────┼───────────────┐
//!          ↓              ↓                  ↓               ↓
//!       Refused     Pending (drop)     Pending (hold)   Established
//!          │              │             recheck loop         │
//!          ↓              ↓                  │          JOB_RETURN loop
//!        close          close                └──────→────────┘
//! ```
//!
//! The socket is split into a reader task and a writer task, so the handler
//! itself only ever waits on queues, timers and the session's close signal.

use std::sync::Arc;
use std::time::Duration;

use fm_02_auth_handshake::{AuthOutcome, AuthRequest};
use fm_03_secure_channel::ChannelError;
use fm_04_job_bus::JobBusError;
use fm_05_session_registry::Session;
use shared_types::{JobId, SealedFrame, WireMessage};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::container::MasterContainer;
use crate::transport::{self, Inbound};

/// How long queued responses get to reach the socket after the handler ends.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEnd {
    /// Too many handshakes in flight; no challenge was issued.
    Busy,
    /// No `AUTH_REQUEST` within the handshake timeout.
    HandshakeTimeout,
    /// The peer sent something other than the expected message.
    ProtocolViolation(&'static str),
    /// Handshake refused; carries the final state name.
    Refused(&'static str),
    /// Key pending and holding is disabled.
    Pending,
    /// Key still pending when the hold ran out.
    HoldExpired,
    /// The peer closed the connection.
    Disconnected,
    /// Session revoked: replaced by a newer connection, swept, or removed.
    Revoked,
    /// Master shutting down.
    Shutdown,
}

/// Serves a single minion connection.
pub struct ConnectionHandler {
    container: Arc<MasterContainer>,
    shutdown: watch::Receiver<bool>,
}

impl ConnectionHandler {
    /// Create a handler bound to the master's subsystems.
    pub fn new(container: Arc<MasterContainer>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            container,
            shutdown,
        }
    }

    /// Run the connection to completion.
    pub async fn serve<S>(self, stream: S, peer: &str) -> ConnectionEnd
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let network = &self.container.config.network;
        let (read_half, write_half) = tokio::io::split(stream);
        let (outbox, outbox_rx) = mpsc::channel(network.outbox_capacity);
        let (mut inbound, reader) = transport::spawn_reader(read_half, network.max_frame_len);
        let mut writer = transport::spawn_writer(write_half, outbox_rx, network.max_frame_len);

        let end = match self.authenticate(&mut inbound, &outbox, peer).await {
            Ok(session) => self.run_session(session, &mut inbound).await,
            Err(end) => end,
        };

        drop(inbound);
        reader.abort();
        drop(outbox);
        if tokio::time::timeout(FLUSH_TIMEOUT, &mut writer).await.is_err() {
            writer.abort();
        }

        debug!(peer, end = ?end, "Connection closed");
        end
    }

    // =========================================================================
    // HANDSHAKE PHASE
    // =========================================================================

    async fn authenticate(
        &self,
        inbound: &mut Inbound,
        outbox: &mpsc::Sender<WireMessage>,
        peer: &str,
    ) -> Result<Arc<Session>, ConnectionEnd> {
        let auth = &self.container.auth;
        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow() {
            return Err(ConnectionEnd::Shutdown);
        }

        let handshake = auth.begin().map_err(|e| {
            warn!(peer, error = %e, "[fm-02] Cannot issue challenge");
            ConnectionEnd::Busy
        })?;
        if outbox.send(handshake.challenge()).await.is_err() {
            auth.abandon(handshake);
            return Err(ConnectionEnd::Disconnected);
        }

        let first = tokio::select! {
            received = tokio::time::timeout(auth.config().handshake_timeout, inbound.recv()) => received,
            _ = shutdown.changed() => {
                auth.abandon(handshake);
                return Err(ConnectionEnd::Shutdown);
            }
        };

        let message = match first {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(e))) => {
                auth.abandon(handshake);
                warn!(peer, error = %e, "[fm-02] Unreadable handshake frame");
                return Err(ConnectionEnd::ProtocolViolation("unreadable handshake frame"));
            }
            Ok(None) => {
                auth.abandon(handshake);
                return Err(ConnectionEnd::Disconnected);
            }
            Err(_) => {
                auth.abandon(handshake);
                debug!(peer, "[fm-02] Handshake timed out");
                return Err(ConnectionEnd::HandshakeTimeout);
            }
        };

        let name = message.name();
        let Some(request) = AuthRequest::from_message(message) else {
            auth.abandon(handshake);
            warn!(peer, message = name, "[fm-02] Expected AUTH_REQUEST");
            return Err(ConnectionEnd::ProtocolViolation("expected AUTH_REQUEST"));
        };

        let outcome = auth.process(handshake, request, outbox).await;
        self.settle(outcome, inbound, outbox).await
    }

    /// Follow an outcome through the pending hold, if enabled.
    async fn settle(
        &self,
        mut outcome: AuthOutcome,
        inbound: &mut Inbound,
        outbox: &mpsc::Sender<WireMessage>,
    ) -> Result<Arc<Session>, ConnectionEnd> {
        let settings = &self.container.config.auth;
        let recheck = Duration::from_secs(settings.recheck_interval_secs);
        let deadline = Instant::now() + Duration::from_secs(settings.pending_hold_timeout_secs);
        let mut shutdown = self.shutdown.clone();

        loop {
            let hold = match outcome {
                AuthOutcome::Established { session } => return Ok(session),
                AuthOutcome::Refused { state } => return Err(ConnectionEnd::Refused(state.name())),
                AuthOutcome::Pending { hold } => hold,
            };

            if !settings.pending_hold {
                return Err(ConnectionEnd::Pending);
            }
            if Instant::now() >= deadline {
                info!(minion = %hold.minion_id(), "[fm-02] Pending hold expired, closing");
                return Err(ConnectionEnd::HoldExpired);
            }

            tokio::select! {
                _ = tokio::time::sleep_until(deadline.min(Instant::now() + recheck)) => {}
                received = inbound.recv() => {
                    return Err(match received {
                        None => ConnectionEnd::Disconnected,
                        Some(_) => {
                            warn!(minion = %hold.minion_id(), "[fm-02] Message during pending hold");
                            ConnectionEnd::ProtocolViolation("message during pending hold")
                        }
                    });
                }
                _ = shutdown.changed() => return Err(ConnectionEnd::Shutdown),
            }

            if Instant::now() >= deadline {
                info!(minion = %hold.minion_id(), "[fm-02] Pending hold expired, closing");
                return Err(ConnectionEnd::HoldExpired);
            }
            outcome = self.container.auth.recheck(hold, outbox).await;
        }
    }

    // =========================================================================
    // SESSION PHASE
    // =========================================================================

    async fn run_session(&self, session: Arc<Session>, inbound: &mut Inbound) -> ConnectionEnd {
        let minion_id = session.minion_id().clone();
        let session_id = session.session_id();
        let mut shutdown = self.shutdown.clone();

        let end = loop {
            tokio::select! {
                _ = session.closed() => break ConnectionEnd::Revoked,
                _ = shutdown.changed() => break ConnectionEnd::Shutdown,
                received = inbound.recv() => match received {
                    None => break ConnectionEnd::Disconnected,
                    Some(Err(e)) => {
                        warn!(minion = %minion_id, error = %e, "[fm-04] Unreadable frame on session");
                        break ConnectionEnd::ProtocolViolation("unreadable frame");
                    }
                    Some(Ok(WireMessage::JobReturn { jid, frame })) => {
                        if let Some(end) = self.handle_return(&session, &jid, &frame).await {
                            break end;
                        }
                    }
                    Some(Ok(other)) => {
                        warn!(minion = %minion_id, message = other.name(), "[fm-04] Unexpected message on session");
                        break ConnectionEnd::ProtocolViolation("unexpected message on session");
                    }
                },
            }
        };

        if self.container.sessions.remove_if_current(&minion_id, session_id) {
            debug!(minion = %minion_id, session = %session_id, "[fm-05] Session removed on disconnect");
        }
        info!(minion = %minion_id, session = %session_id, end = ?end, "[fm-05] Session ended");
        end
    }

    /// Returns `Some` when the return shows the session is gone.
    async fn handle_return(
        &self,
        session: &Session,
        jid: &JobId,
        frame: &SealedFrame,
    ) -> Option<ConnectionEnd> {
        let minion_id = session.minion_id();
        match self
            .container
            .job_bus
            .submit_return(session.session_id(), jid, frame)
            .await
        {
            Ok(_) => None,
            Err(JobBusError::SessionNotFound(_) | JobBusError::Channel(ChannelError::Revoked)) => {
                Some(ConnectionEnd::Revoked)
            }
            Err(
                e @ (JobBusError::ReplayDetected { .. }
                | JobBusError::Channel(_)
                | JobBusError::UnauthorizedReturn { .. }
                | JobBusError::DuplicateReturn { .. }
                | JobBusError::UnknownJob(_)),
            ) => {
                warn!(minion = %minion_id, jid = %jid, error = %e, "[fm-04] Return refused");
                None
            }
            Err(e) => {
                error!(minion = %minion_id, jid = %jid, error = %e, "[fm-04] Return could not be stored");
                None
            }
        }
    }
}
