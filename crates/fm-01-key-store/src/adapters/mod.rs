//! # Adapters Module
//!
//! - `fs`: directory-per-minion storage
//! - `memory`: in-memory storage for tests
//! - `lock`: process lock on the store directory

pub mod fs;
pub mod lock;
pub mod memory;
