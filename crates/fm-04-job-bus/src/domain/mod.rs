//! # Domain Layer

pub mod errors;
pub mod jid;
pub mod job;
pub mod target;
