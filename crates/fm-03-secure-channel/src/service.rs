//! # Channel Codec
//!
//! Stateless operations over a [`ChannelState`].

use crate::domain::channel::{ChannelState, Direction};
use crate::domain::errors::ChannelError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared_crypto::symmetric::{self, Nonce, NONCE_LEN};
use shared_types::SealedFrame;
use tracing::debug;

/// Protocol label bound into every frame's authenticated data.
pub const CHANNEL_LABEL: &[u8] = b"fm-channel-v1";

/// AES-256-GCM frame codec.
pub struct SecureChannel;

impl SecureChannel {
    /// Seal `plaintext` as the next frame in `direction`.
    ///
    /// # Errors
    ///
    /// `Revoked` if the session was revoked, `SequenceExhausted` after
    /// `u64::MAX` frames, `Encrypt` if the cipher fails.
    pub fn encrypt(
        state: &ChannelState,
        direction: Direction,
        plaintext: &[u8],
    ) -> Result<SealedFrame, ChannelError> {
        if state.is_revoked() {
            return Err(ChannelError::Revoked);
        }

        // Held across encryption so frames leave in sequence order.
        let mut sent = state.sent_counter(direction).lock();
        let seq = sent.checked_add(1).ok_or(ChannelError::SequenceExhausted)?;

        let ciphertext = symmetric::encrypt(
            state.key(),
            &nonce(direction, seq),
            plaintext,
            &aad(state, direction, seq),
        )
        .map_err(|e| ChannelError::Encrypt(e.to_string()))?;

        *sent = seq;
        Ok(SealedFrame { seq, ciphertext })
    }

    /// Open a frame received in `direction`.
    ///
    /// # Errors
    ///
    /// `Revoked` before any key use, `ReplayDetected` when the sequence is
    /// not above the last accepted one, `Decrypt` when the tag fails.
    pub fn decrypt(
        state: &ChannelState,
        direction: Direction,
        frame: &SealedFrame,
    ) -> Result<Vec<u8>, ChannelError> {
        if state.is_revoked() {
            return Err(ChannelError::Revoked);
        }

        let mut last_accepted = state.accepted_counter(direction).lock();
        if frame.seq <= *last_accepted {
            debug!(
                session = %state.session_id(),
                seq = frame.seq,
                last_accepted = *last_accepted,
                "[fm-03] Replayed frame refused"
            );
            return Err(ChannelError::ReplayDetected {
                seq: frame.seq,
                last_accepted: *last_accepted,
            });
        }

        let plaintext = symmetric::decrypt(
            state.key(),
            &nonce(direction, frame.seq),
            &frame.ciphertext,
            &aad(state, direction, frame.seq),
        )
        .map_err(|_| ChannelError::Decrypt)?;

        *last_accepted = frame.seq;
        Ok(plaintext)
    }

    /// Serialize `value` as JSON and seal it.
    pub fn seal_json<T: Serialize>(
        state: &ChannelState,
        direction: Direction,
        value: &T,
    ) -> Result<SealedFrame, ChannelError> {
        let bytes = serde_json::to_vec(value).map_err(|e| ChannelError::Payload(e.to_string()))?;
        Self::encrypt(state, direction, &bytes)
    }

    /// Open a frame and decode its JSON body.
    ///
    /// The sequence counter advances even if decoding fails, since the frame
    /// itself was authentic.
    pub fn open_json<T: DeserializeOwned>(
        state: &ChannelState,
        direction: Direction,
        frame: &SealedFrame,
    ) -> Result<T, ChannelError> {
        let bytes = Self::decrypt(state, direction, frame)?;
        serde_json::from_slice(&bytes).map_err(|e| ChannelError::Payload(e.to_string()))
    }
}

fn nonce(direction: Direction, seq: u64) -> Nonce {
    let mut bytes = [0u8; NONCE_LEN];
    bytes[..4].copy_from_slice(&direction.tag());
    bytes[4..].copy_from_slice(&seq.to_be_bytes());
    Nonce::from_bytes(bytes)
}

fn aad(state: &ChannelState, direction: Direction, seq: u64) -> Vec<u8> {
    let mut aad = Vec::with_capacity(CHANNEL_LABEL.len() + 16 + 4 + 8);
    aad.extend_from_slice(CHANNEL_LABEL);
    aad.extend_from_slice(state.session_id().as_bytes());
    aad.extend_from_slice(&direction.tag());
    aad.extend_from_slice(&seq.to_be_bytes());
    aad
}
