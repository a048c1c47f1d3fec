//! # Domain Errors

use crate::domain::state::DenyReason;
use fm_01_key_store::KeyStoreError;
use shared_types::IdentityError;
use thiserror::Error;

/// Challenge ledger failures.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeError {
    /// Never issued, or already consumed.
    #[error("Unknown or already used challenge")]
    Unknown,
    /// Issued but older than the TTL.
    #[error("Challenge expired")]
    Expired,
    /// Too many challenges outstanding.
    #[error("Too many outstanding challenges")]
    Exhausted,
}

/// Reasons a handshake step fails.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The claimed ID failed the sanitizer.
    #[error("Invalid identity: {0}")]
    InvalidIdentity(#[from] IdentityError),

    /// The echoed nonce is not a live challenge of this connection.
    #[error("Challenge rejected: {0}")]
    Challenge(#[from] ChallengeError),

    /// The presented public key is unusable.
    #[error("Malformed public key: {0}")]
    MalformedKey(String),

    /// Key store failure.
    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),

    /// Session key generation or wrapping failed.
    #[error("Crypto failure: {0}")]
    Crypto(String),

    /// The connection went away mid-handshake.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl AuthError {
    /// How the handshake ends for this error.
    #[must_use]
    pub fn deny_reason(&self) -> DenyReason {
        match self {
            AuthError::InvalidIdentity(_) => DenyReason::InvalidIdentity,
            AuthError::Challenge(_) => DenyReason::ChallengeUnknown,
            AuthError::MalformedKey(_) => DenyReason::MalformedKey,
            AuthError::KeyStore(_) | AuthError::Crypto(_) | AuthError::ConnectionClosed => {
                DenyReason::Internal
            }
        }
    }
}
