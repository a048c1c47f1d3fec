//! # Frame Codec
//!
//! ```text
//! ┌───────────────┬──────────────────────────────────────────┐
//! │ 4 bytes (BE)  │ N bytes                                  │
//! │ payload len   │ WireMessage as JSON                      │
//! └───────────────┴──────────────────────────────────────────┘
//! ```
//!
//! The length is checked against the configured limit before any payload
//! byte is buffered.

use shared_types::WireMessage;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Framing failures.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Socket error, including EOF in the middle of a frame.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Declared or encoded length above the limit.
    #[error("Frame of {len} bytes exceeds limit of {max}")]
    TooLarge {
        /// Frame length.
        len: usize,
        /// Configured limit.
        max: usize,
    },

    /// Zero-length frame.
    #[error("Empty frame")]
    Empty,

    /// Payload is not a valid message. Covers invalid IDs in `jid` fields,
    /// since those are sanitized during decoding.
    #[error("Undecodable frame: {0}")]
    Decode(String),

    /// Message could not be serialized.
    #[error("Unencodable message: {0}")]
    Encode(String),
}

/// Read one message.
///
/// Returns `Ok(None)` on a clean EOF at a frame boundary.
///
/// # Errors
///
/// Any partial frame, oversized length or undecodable payload.
pub async fn read_message<R>(reader: &mut R, max_len: usize) -> Result<Option<WireMessage>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Err(FrameError::Empty);
    }
    if len > max_len {
        return Err(FrameError::TooLarge { len, max: max_len });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    serde_json::from_slice(&payload)
        .map(Some)
        .map_err(|e| FrameError::Decode(e.to_string()))
}

/// Write one message and flush.
///
/// # Errors
///
/// Encoding failure, oversized message, or socket error.
pub async fn write_message<W>(writer: &mut W, message: &WireMessage, max_len: usize) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(message).map_err(|e| FrameError::Encode(e.to_string()))?;
    if payload.len() > max_len {
        return Err(FrameError::TooLarge {
            len: payload.len(),
            max: max_len,
        });
    }
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::TooLarge {
        len: payload.len(),
        max: max_len,
    })?;

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{AuthStatus, MAX_FRAME_LEN};

    fn challenge() -> WireMessage {
        WireMessage::Challenge {
            nonce: vec![7u8; 32],
        }
    }

    #[tokio::test]
    async fn test_frames_survive_a_stream() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let response = WireMessage::AuthResponse {
            status: AuthStatus::Pending,
            session_id: None,
            encrypted_session_key: None,
        };

        write_message(&mut a, &challenge(), MAX_FRAME_LEN).await.unwrap();
        write_message(&mut a, &response, MAX_FRAME_LEN).await.unwrap();
        drop(a);

        assert_eq!(read_message(&mut b, MAX_FRAME_LEN).await.unwrap(), Some(challenge()));
        assert_eq!(read_message(&mut b, MAX_FRAME_LEN).await.unwrap(), Some(response));
        assert_eq!(read_message(&mut b, MAX_FRAME_LEN).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_length_is_refused_before_reading() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&(1_000_000u32).to_be_bytes()).await.unwrap();

        match read_message(&mut b, 1024).await {
            Err(FrameError::TooLarge { len, max }) => {
                assert_eq!(len, 1_000_000);
                assert_eq!(max, 1024);
            }
            other => panic!("expected TooLarge, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversized_message_is_not_written() {
        let (mut a, _b) = tokio::io::duplex(64);
        let result = write_message(&mut a, &challenge(), 16).await;
        assert!(matches!(result, Err(FrameError::TooLarge { max: 16, .. })));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_an_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&10u32.to_be_bytes()).await.unwrap();
        a.write_all(b"{\"ty").await.unwrap();
        drop(a);

        assert!(matches!(read_message(&mut b, 1024).await, Err(FrameError::Io(_))));
    }

    #[tokio::test]
    async fn test_empty_and_garbage_frames() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        a.write_all(&0u32.to_be_bytes()).await.unwrap();
        assert!(matches!(read_message(&mut b, 1024).await, Err(FrameError::Empty)));

        let body = br#"{"type":"JOB_RETURN","jid":"../x","frame":{"seq":1,"ciphertext":""}}"#;
        a.write_all(&(body.len() as u32).to_be_bytes()).await.unwrap();
        a.write_all(body).await.unwrap();
        assert!(matches!(read_message(&mut b, 1024).await, Err(FrameError::Decode(_))));
    }
}
