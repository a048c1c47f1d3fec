//! Session errors.

use thiserror::Error;

/// Why a message could not be queued for a session.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum OutboxError {
    /// The outbound queue is at capacity.
    #[error("Outbound queue full")]
    Full,

    /// The connection's writer is gone or the session was revoked.
    #[error("Session closed")]
    Closed,
}
