//! # Wire Messages
//!
//! Messages exchanged between master and minion. Each message travels as a
//! JSON document behind a 4-byte big-endian length prefix.
//!
//! ```text
//! minion                          master
//!   │ ───────── connect ──────────→ │
//!   │ ←──────── CHALLENGE ───────── │  single-use nonce
//!   │ ───────── AUTH_REQUEST ─────→ │  raw id, pubkey, signature(nonce)
//!   │ ←──────── AUTH_RESPONSE ───── │  status, wrapped session key
//!   │ ←──────── JOB_PUBLISH ─────── │  sealed payload, seq
//!   │ ───────── JOB_RETURN ───────→ │  sealed result, seq
//! ```

use crate::entities::SessionId;
use crate::identity::JobId;
use serde::{Deserialize, Serialize};

/// Upper bound for a single encoded message.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Handshake outcome reported to the minion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStatus {
    /// Session established; a wrapped session key follows.
    Accepted,
    /// Key awaits operator approval.
    Pending,
    /// Key was rejected by an operator.
    Rejected,
    /// Denied: key mismatch, bad signature, or key in denied state.
    Denied,
}

/// An AES-GCM sealed message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedFrame {
    /// Per-direction sequence number, bound into the authenticated data.
    pub seq: u64,
    /// Ciphertext including the GCM tag.
    #[serde(with = "hex_bytes")]
    pub ciphertext: Vec<u8>,
}

/// Every message of the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WireMessage {
    /// Server-issued nonce the minion must sign.
    Challenge {
        #[serde(with = "hex_bytes")]
        nonce: Vec<u8>,
    },
    /// Identity claim with proof of key possession.
    AuthRequest {
        /// Unvalidated, minion-supplied ID.
        raw_id: String,
        /// SubjectPublicKeyInfo PEM.
        public_key_pem: String,
        /// Echo of the challenge nonce.
        #[serde(with = "hex_bytes")]
        nonce: Vec<u8>,
        /// RSA-PSS signature over the challenge message.
        #[serde(with = "hex_bytes")]
        signature: Vec<u8>,
    },
    /// Handshake outcome.
    AuthResponse {
        /// Result of the attempt.
        status: AuthStatus,
        /// Present only when `status` is `Accepted`.
        #[serde(default)]
        session_id: Option<SessionId>,
        /// RSA-OAEP wrapped AES key, present only when `Accepted`.
        #[serde(default, with = "opt_hex_bytes")]
        encrypted_session_key: Option<Vec<u8>>,
    },
    /// Sealed job payload, master to minion.
    JobPublish {
        /// Job identifier.
        jid: JobId,
        /// Sealed `JobPayload`.
        frame: SealedFrame,
    },
    /// Sealed job result, minion to master.
    JobReturn {
        /// Job identifier.
        jid: JobId,
        /// Sealed `JobResult`.
        frame: SealedFrame,
    },
}

impl WireMessage {
    /// Message name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            WireMessage::Challenge { .. } => "CHALLENGE",
            WireMessage::AuthRequest { .. } => "AUTH_REQUEST",
            WireMessage::AuthResponse { .. } => "AUTH_RESPONSE",
            WireMessage::JobPublish { .. } => "JOB_PUBLISH",
            WireMessage::JobReturn { .. } => "JOB_RETURN",
        }
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}

mod opt_hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&hex::encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let text: Option<String> = Option::deserialize(deserializer)?;
        text.map(|t| hex::decode(t).map_err(serde::de::Error::custom))
            .transpose()
    }
}
