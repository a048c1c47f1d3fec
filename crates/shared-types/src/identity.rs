//! # Identity Sanitizer
//!
//! The only way to turn an untrusted, minion-supplied string into a
//! [`MinionId`] (or a caller-supplied string into a [`JobId`]).
//!
//! ## Security
//!
//! Both identifiers are used verbatim as filesystem path components
//! (`minions/<id>/`, `job_cache/<jid>/<id>/`) and as map keys. A value that
//! survives [`MinionId::parse`] is guaranteed to be a single, non-traversing
//! path segment:
//!
//! - non-empty and length-bounded
//! - no `/`, `\`, NUL or other control characters
//! - not `.` or `..`, no `..` anywhere, no leading/trailing `.`
//! - only `[A-Za-z0-9._-]` (hostnames, FQDNs and IPv4 literals)
//!
//! Validation is total: every input produces either an ID or an
//! [`IdentityError`] naming the first rule that failed.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Maximum length of a minion ID in bytes.
pub const MAX_MINION_ID_LEN: usize = 255;

/// Maximum length of a job ID in bytes.
pub const MAX_JOB_ID_LEN: usize = 64;

/// Longest prefix of a rejected raw ID that may appear in logs.
const LOG_PREVIEW_LEN: usize = 32;

/// The specific sanitizer rule an identifier violated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// Empty string.
    #[error("identifier is empty")]
    Empty,

    /// Longer than the allowed byte length.
    #[error("identifier is {len} bytes, maximum is {max}")]
    TooLong { len: usize, max: usize },

    /// Contains `/` or `\`.
    #[error("identifier contains a path separator")]
    PathSeparator,

    /// Contains a NUL byte.
    #[error("identifier contains a NUL byte")]
    NulByte,

    /// Contains a control character other than NUL.
    #[error("identifier contains a control character")]
    ControlCharacter,

    /// Is `.`/`..` or contains a `..` sequence.
    #[error("identifier contains a relative path segment")]
    RelativeSegment,

    /// Starts or ends with `.`.
    #[error("identifier starts or ends with '.'")]
    EdgeDot,

    /// Contains a character outside the allow-list.
    #[error("identifier contains disallowed character {0:?}")]
    DisallowedCharacter(char),
}

/// Run every sanitizer rule against `raw`.
///
/// Rule order matters only for which error is reported; any failure rejects.
fn sanitize(raw: &str, max_len: usize) -> Result<(), IdentityError> {
    if raw.is_empty() {
        return Err(IdentityError::Empty);
    }
    if raw.len() > max_len {
        return Err(IdentityError::TooLong {
            len: raw.len(),
            max: max_len,
        });
    }

    for c in raw.chars() {
        match c {
            '/' | '\\' => return Err(IdentityError::PathSeparator),
            '\0' => return Err(IdentityError::NulByte),
            c if c.is_control() => return Err(IdentityError::ControlCharacter),
            _ => {}
        }
    }

    if raw == "." || raw == ".." || raw.contains("..") {
        return Err(IdentityError::RelativeSegment);
    }
    if raw.starts_with('.') || raw.ends_with('.') {
        return Err(IdentityError::EdgeDot);
    }

    if let Some(bad) = raw
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')))
    {
        return Err(IdentityError::DisallowedCharacter(bad));
    }

    Ok(())
}

/// Escaped, bounded preview of an untrusted string for log output.
///
/// Never use the result for anything but logging.
#[must_use]
pub fn log_preview(raw: &str) -> String {
    let mut preview: String = raw.chars().take(LOG_PREVIEW_LEN).collect();
    if raw.chars().count() > LOG_PREVIEW_LEN {
        preview.push('…');
    }
    preview.escape_debug().to_string()
}

// =============================================================================
// MINION ID
// =============================================================================

/// A validated, traversal-safe minion identifier.
///
/// There is no `From<String>`; construction goes through [`MinionId::parse`],
/// including deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MinionId(String);

impl MinionId {
    /// Validate a raw, untrusted minion ID.
    ///
    /// # Errors
    ///
    /// Returns the [`IdentityError`] for the first violated rule.
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        sanitize(raw, MAX_MINION_ID_LEN)?;
        Ok(Self(raw.to_owned()))
    }

    /// The validated ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `base` joined with this ID as exactly one path segment.
    #[must_use]
    pub fn path_under(&self, base: &Path) -> PathBuf {
        base.join(&self.0)
    }
}

impl fmt::Display for MinionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MinionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for MinionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for MinionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// JOB ID
// =============================================================================

/// A validated job identifier.
///
/// Generated JIDs are 20-digit timestamps (`YYYYMMDDhhmmssffffff`), but a
/// caller may pass its own; either way it is a safe path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(String);

impl JobId {
    /// Validate a raw job ID.
    ///
    /// # Errors
    ///
    /// Returns the [`IdentityError`] for the first violated rule.
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        sanitize(raw, MAX_JOB_ID_LEN)?;
        Ok(Self(raw.to_owned()))
    }

    /// The validated JID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `base` joined with this JID as exactly one path segment.
    #[must_use]
    pub fn path_under(&self, base: &Path) -> PathBuf {
        base.join(&self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for JobId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
