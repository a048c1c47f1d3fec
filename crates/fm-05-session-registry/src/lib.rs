//! # Session Registry (FM-05)
//!
//! Maps each authenticated [`MinionId`](shared_types::MinionId) to its one
//! live [`Session`]. Registering a second session for the same ID replaces
//! the first: the old channel is revoked and its connection told to close,
//! so anything still arriving on it fails with `Revoked` or is no longer
//! found.
//!
//! Sessions are in-memory only and never outlive the master process.

pub mod domain;
pub mod service;

pub use domain::errors::OutboxError;
pub use domain::session::Session;
pub use service::SessionRegistry;
