//! # Attack Simulations
//!
//! Hostile minions probing the identity boundary: IDs and JIDs that try to
//! escape the master's storage tree, impersonation with a foreign key, and
//! frames replayed or re-addressed to other sessions.

pub mod identity;
pub mod impersonation;
