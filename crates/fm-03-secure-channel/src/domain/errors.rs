//! Channel error types.

use thiserror::Error;

/// Failures of the channel codec. None of them panic; all are terminal for
/// the frame in question only.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The session was revoked; no key material was used.
    #[error("Channel revoked")]
    Revoked,

    /// Sequence number at or below the last accepted one.
    #[error("Replay detected: seq {seq} <= last accepted {last_accepted}")]
    ReplayDetected {
        /// Sequence carried by the frame.
        seq: u64,
        /// Highest sequence accepted so far in that direction.
        last_accepted: u64,
    },

    /// GCM tag did not verify (tampered, wrong key, or wrong direction).
    #[error("Frame failed authentication")]
    Decrypt,

    /// Encryption failed.
    #[error("Encryption failed: {0}")]
    Encrypt(String),

    /// The per-direction sequence space is used up.
    #[error("Sequence space exhausted")]
    SequenceExhausted,

    /// The decrypted payload did not decode.
    #[error("Malformed payload: {0}")]
    Payload(String),
}
