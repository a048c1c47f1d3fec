//! # Secure Channel Codec (FM-03)
//!
//! Seals and opens every post-handshake message with the session's AES-256
//! key.
//!
//! ## Wire Construction
//!
//! ```text
//! nonce = direction tag (4 bytes) ‖ seq (8 bytes, big-endian)
//! aad   = "fm-channel-v1" ‖ session id (16) ‖ direction tag (4) ‖ seq (8)
//! ```
//!
//! Sequence numbers are per direction and strictly increasing, so a nonce is
//! never reused under one key. The receiver keeps the highest sequence it
//! has accepted and refuses anything at or below it.
//!
//! ## Security Notes
//!
//! - The receive counter only advances after the GCM tag verifies; a forged
//!   frame cannot burn sequence numbers.
//! - A revoked channel fails before the key is touched.

pub mod domain;
pub mod service;

pub use domain::channel::{ChannelState, Direction};
pub use domain::errors::ChannelError;
pub use service::SecureChannel;
