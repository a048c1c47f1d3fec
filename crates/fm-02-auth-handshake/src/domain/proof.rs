//! The message a minion signs to prove key possession.

/// Domain separation label.
pub const AUTH_LABEL: &[u8] = b"fm-auth-v1";

/// Challenge nonce length.
pub const NONCE_LEN: usize = 32;

/// `AUTH_LABEL ‖ nonce ‖ raw_id`.
///
/// The raw (pre-sanitization) ID is signed so the proof covers exactly what
/// the minion sent.
#[must_use]
pub fn challenge_message(nonce: &[u8], raw_id: &str) -> Vec<u8> {
    let mut message = Vec::with_capacity(AUTH_LABEL.len() + nonce.len() + raw_id.len());
    message.extend_from_slice(AUTH_LABEL);
    message.extend_from_slice(nonce);
    message.extend_from_slice(raw_id.as_bytes());
    message
}
