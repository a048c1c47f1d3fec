//! # Core Domain Entities
//!
//! Records shared between the key store, handshake, job bus and runtime.

use crate::identity::{JobId, MinionId};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a timestamp from seconds.
    #[must_use]
    pub const fn new(secs: u64) -> Self {
        Self(secs)
    }

    /// Seconds since the epoch.
    #[must_use]
    pub const fn as_secs(&self) -> u64 {
        self.0
    }

    /// Seconds elapsed from `earlier` to `self` (zero if `earlier` is later).
    #[must_use]
    pub fn saturating_elapsed_since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

/// Identifier of one authenticated session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Fresh random session ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID (e.g. decoded from the wire).
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Raw 16 bytes, used as authenticated data by the channel codec.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// KEYS
// =============================================================================

/// A minion's RSA public key in SubjectPublicKeyInfo PEM form.
///
/// Stored and compared as normalized text (trimmed, `\n` line endings).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKeyPem(String);

impl PublicKeyPem {
    /// Wrap PEM text, normalizing line endings and surrounding whitespace.
    #[must_use]
    pub fn new(pem: &str) -> Self {
        let normalized = pem.replace("\r\n", "\n");
        Self(normalized.trim().to_owned())
    }

    /// PEM text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Acceptance state of a minion key.
///
/// `Rejected` is an explicit "no" an operator may later revisit; `Denied`
/// means no further attempts are allowed for this ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyState {
    /// Awaiting operator decision.
    Pending,
    /// Trusted; handshakes may establish sessions.
    Accepted,
    /// Explicitly refused.
    Rejected,
    /// Explicitly refused, no further attempts allowed.
    Denied,
}

impl KeyState {
    /// All states.
    pub const ALL: [KeyState; 4] = [
        KeyState::Accepted,
        KeyState::Pending,
        KeyState::Rejected,
        KeyState::Denied,
    ];

    /// Marker file / directory name for this state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            KeyState::Pending => "pending",
            KeyState::Accepted => "accepted",
            KeyState::Rejected => "rejected",
            KeyState::Denied => "denied",
        }
    }
}

impl fmt::Display for KeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of one minion's key and its acceptance state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Owner of the key.
    pub minion_id: MinionId,
    /// The minion's public key.
    pub public_key: PublicKeyPem,
    /// Current acceptance state.
    pub state: KeyState,
    /// When the key was first proposed.
    pub first_seen: Timestamp,
    /// When the key last entered `Accepted`.
    pub last_accepted: Option<Timestamp>,
}

// =============================================================================
// JOBS
// =============================================================================

/// How a job selects its recipients among connected minions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tgt_type", content = "tgt", rename_all = "lowercase")]
pub enum TargetSpec {
    /// Exactly one minion ID.
    Exact(String),
    /// Shell-style glob (`*`, `?`, `[...]`).
    Glob(String),
    /// Explicit list of IDs.
    List(Vec<String>),
    /// Regular expression matched against the whole ID.
    Regex(String),
}

impl TargetSpec {
    /// Short label for logs and job loads.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            TargetSpec::Exact(_) => "exact",
            TargetSpec::Glob(_) => "glob",
            TargetSpec::List(_) => "list",
            TargetSpec::Regex(_) => "regex",
        }
    }
}

/// What a minion is asked to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    /// The job that carries this payload.
    pub jid: JobId,
    /// Execution function name (e.g. `state.apply`).
    pub fun: String,
    /// Positional arguments.
    #[serde(default)]
    pub arg: Vec<serde_json::Value>,
}

/// An immutable, published job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Job identifier.
    pub jid: JobId,
    /// Recipient selection.
    pub target: TargetSpec,
    /// Execution function name.
    pub fun: String,
    /// Positional arguments.
    #[serde(default)]
    pub arg: Vec<serde_json::Value>,
    /// Submitting user, if known.
    #[serde(default)]
    pub user: Option<String>,
    /// Free-form caller metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Publication time.
    pub issued_at: Timestamp,
}

impl Job {
    /// The payload delivered to each recipient.
    #[must_use]
    pub fn payload(&self) -> JobPayload {
        JobPayload {
            jid: self.jid.clone(),
            fun: self.fun.clone(),
            arg: self.arg.clone(),
        }
    }
}

/// What the execution subsystem produced for one job on one minion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Whether execution succeeded.
    pub success: bool,
    /// Result data.
    #[serde(rename = "return")]
    pub output: serde_json::Value,
}

/// A minion's persisted result for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReturn {
    /// Job identifier.
    pub jid: JobId,
    /// Authenticated submitter.
    pub minion_id: MinionId,
    /// Function that was run.
    pub fun: String,
    /// Whether execution succeeded.
    pub success: bool,
    /// Result data.
    #[serde(rename = "return")]
    pub output: serde_json::Value,
    /// When the master accepted the return.
    pub received_at: Timestamp,
}
