//! # Shared Types Crate
//!
//! Types every fleet-master subsystem agrees on.
//!
//! ## Design Principles
//!
//! - **Validated Newtype Boundary**: [`MinionId`] and [`JobId`] are only
//!   constructible through the identity sanitizer. Path and map-key helpers
//!   across the workspace accept these types, never raw strings.
//! - **Single Source of Truth**: entities and wire messages are defined once
//!   here and shared by the key store, handshake, job bus and runtime.

pub mod entities;
pub mod identity;
pub mod pattern;
pub mod time;
pub mod wire;

pub use entities::*;
pub use identity::{log_preview, IdentityError, JobId, MinionId, MAX_JOB_ID_LEN, MAX_MINION_ID_LEN};
pub use pattern::{glob_match, GlobPattern, PatternError};
pub use time::{FixedTimeSource, SystemTimeSource, TimeSource};
pub use wire::{AuthStatus, SealedFrame, WireMessage, MAX_FRAME_LEN};
