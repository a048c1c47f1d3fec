//! Result of proposing a key.

use shared_types::KeyRecord;

/// What `propose` found or did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposeOutcome {
    /// A record with the identical key already existed; nothing changed.
    Existing(KeyRecord),
    /// First contact: a new record was written.
    Created(KeyRecord),
    /// A record exists with a different key. It was left untouched.
    KeyMismatch(KeyRecord),
}

impl ProposeOutcome {
    /// The record in question (the stored one for `KeyMismatch`).
    #[must_use]
    pub fn record(&self) -> &KeyRecord {
        match self {
            ProposeOutcome::Existing(r)
            | ProposeOutcome::Created(r)
            | ProposeOutcome::KeyMismatch(r) => r,
        }
    }
}
