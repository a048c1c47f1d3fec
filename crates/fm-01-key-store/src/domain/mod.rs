//! # Domain Layer

pub mod errors;
pub mod outcome;
pub mod policy;
