//! # Auth Handshake (FM-02)
//!
//! Decides whether a connecting minion gets a session.
//!
//! ## Protocol
//!
//! ```text
//! Connected ──AUTH_REQUEST──→ IdentityClaimed ──propose──→ KeyChecked
//!                                                             │
//!            ┌──────────────────┬─────────────────┬───────────┴──────┐
//!            ▼                  ▼                 ▼                  ▼
//!        Accepted        PendingApproval       Rejected            Denied
//!            │                  │ (operator accepts,
//!   signature + session key     │  runtime rechecks)
//!            ▼                  ▼
//!   SessionEstablished      Accepted ...
//! ```
//!
//! ## Security Notes
//!
//! - The claimed ID passes the identity sanitizer before anything else; a
//!   refused ID gets no response and leaves no record.
//! - Challenges are single-use and expire after the handshake timeout.
//! - A presented key that differs from the stored one is denied. Re-keying
//!   is an operator action (delete, then accept the new key).
//! - No key material leaves the master before `SessionEstablished`.

pub mod domain;
pub mod service;

pub use domain::challenge::ChallengeLedger;
pub use domain::config::AuthConfig;
pub use domain::errors::{AuthError, ChallengeError};
pub use domain::proof::{challenge_message, AUTH_LABEL, NONCE_LEN};
pub use domain::state::{DenyReason, HandshakeEvent, HandshakeState};
pub use service::{AuthOutcome, AuthRequest, AuthService, Handshake, PendingHandshake};
