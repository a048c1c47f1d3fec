//! Channel state and errors.

pub mod channel;
pub mod errors;
