//! # Integration Tests
//!
//! Master and minions talking over real sockets, checked against the
//! persisted layout and the subsystem APIs.

pub mod flows;
pub mod scenarios;
