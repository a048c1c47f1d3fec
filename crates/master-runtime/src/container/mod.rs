//! # Master Container Module
//!
//! Dependency injection container for the master's subsystems.
//!
//! ## Structure
//!
//! - `config` - Master configuration (file + environment)
//! - `master` - Subsystem wiring and store ownership

pub mod config;
pub mod master;

pub use config::{ConfigError, MasterConfig};
pub use master::{FileKeyStore, MasterContainer, StartupError};
