//! # Handlers
//!
//! Long-running tasks of the master: one [`ConnectionHandler`] per minion
//! connection, plus the periodic maintenance handlers.

pub mod connection;
pub mod maintenance;

#[cfg(test)]
mod tests;

pub use connection::{ConnectionEnd, ConnectionHandler};
pub use maintenance::{CacheCleaner, EventReturnHandler, SweepHandler, SweepReport};
