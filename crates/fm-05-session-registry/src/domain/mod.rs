//! Session entity and errors.

pub mod errors;
pub mod session;
