//! # Domain Layer
//!
//! Pure handshake logic: the state machine, challenge bookkeeping, and the
//! signed message format. No I/O.

pub mod challenge;
pub mod config;
pub mod errors;
pub mod proof;
pub mod state;
