//! # Shared Crypto
//!
//! Cryptographic primitives used by the master and minions.
//!
//! ## Components
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `identity` | RSA-PSS / RSA-OAEP (SHA-256) | Minion identity, session key wrapping |
//! | `symmetric` | AES-256-GCM | Session channel sealing |
//! | `hashing` | SHA-256 | Key fingerprints |

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod errors;
pub mod hashing;
pub mod identity;
pub mod symmetric;

// Re-exports
pub use errors::CryptoError;
pub use hashing::{fingerprint, sha256};
pub use identity::{RsaKeyPair, RsaPublicKey, DEFAULT_RSA_BITS};
pub use symmetric::{decrypt, encrypt, Nonce, SecretKey};
