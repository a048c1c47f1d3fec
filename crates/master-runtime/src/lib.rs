//! # Master Runtime Library
//!
//! This library exposes the runtime's modules for testing and for embedding
//! a minion. The main entry point is the `main.rs` binary.
//!
//! ## Modules
//!
//! - `container/` - Configuration and subsystem wiring
//! - `transport/` - Length-prefixed JSON framing
//! - `handlers/` - Connection handler and maintenance tasks
//! - `minion/` - Minion-side client and the `JobExecutor` seam
//! - `runtime` - Startup and graceful shutdown

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod container;
pub mod handlers;
pub mod minion;
pub mod runtime;
pub mod transport;

pub use container::{ConfigError, MasterConfig, MasterContainer, StartupError};
pub use handlers::{ConnectionEnd, ConnectionHandler};
pub use minion::{JobExecutor, MinionClient, MinionConnection, MinionError};
pub use runtime::{MasterRuntime, RuntimeError};
