//! # Key Store (FM-01)
//!
//! Durable record of every minion public key the master has seen, and
//! whether an operator (or the auto-accept policy) trusts it.
//!
//! ## Persisted Layout
//!
//! ```text
//! <base>/minions/
//! ├── .lock                    fs2 exclusive lock, one master per store
//! └── <MinionId>/
//!     ├── key                  SubjectPublicKeyInfo PEM
//!     └── accepted             exactly one state marker (JSON metadata):
//!                              accepted | pending | rejected | denied
//! ```
//!
//! ## Domain Invariants
//!
//! | Invariant | Enforcement |
//! |-----------|-------------|
//! | A stored key is never silently replaced | `propose` returns `KeyMismatch` and writes nothing |
//! | One state per minion | marker written via temp file + rename, then the others removed |
//! | Path safety | every path is derived from a [`MinionId`](shared_types::MinionId) |
//! | Mutations serialized per ID | striped mutexes; distinct IDs proceed in parallel |
//!
//! ## Crate Structure (Hexagonal Architecture)
//!
//! - `domain/` - errors, propose outcome, auto-accept policy
//! - `ports/` - `KeyStoreApi`/`KeyAdminApi` (inbound), `KeyStorage` (outbound)
//! - `adapters/` - filesystem and memory storage, process lock
//! - `service/` - `KeyStoreService`

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

pub use adapters::fs::FileKeyStorage;
pub use adapters::lock::{LockError, StoreLock};
pub use adapters::memory::MemoryKeyStorage;
pub use domain::errors::KeyStoreError;
pub use domain::outcome::ProposeOutcome;
pub use domain::policy::AutoAcceptPolicy;
pub use ports::inbound::{KeyAdminApi, KeyStoreApi};
pub use ports::outbound::KeyStorage;
pub use service::KeyStoreService;
