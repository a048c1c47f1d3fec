//! # Adapters Layer
//!
//! - `local` - directory tree under the master's base directory
//! - `memory` - in-process maps for tests

pub mod local;
pub mod memory;
