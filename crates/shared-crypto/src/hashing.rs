//! # Hashing
//!
//! SHA-256 helpers and operator-facing key fingerprints.

use sha2::{Digest, Sha256};

/// Hash data with SHA-256.
#[must_use]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Colon-separated hex SHA-256 fingerprint, as shown by the key admin.
///
/// ```
/// let fp = shared_crypto::fingerprint(b"abc");
/// assert!(fp.starts_with("ba:78:16:bf"));
/// ```
#[must_use]
pub fn fingerprint(data: &[u8]) -> String {
    sha256(data)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}
