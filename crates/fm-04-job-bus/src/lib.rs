//! # Job Bus (FM-04)
//!
//! Publishes jobs to authenticated minions and collects their returns.
//!
//! ## Flow
//!
//! ```text
//! publish(JobRequest)
//!   ├─ prep_jid ─────────────→ job cache (reserve, JidInUse if taken)
//!   ├─ resolve TargetSpec against live sessions
//!   ├─ track job, save_load(job, matched)
//!   ├─ seal payload per recipient, try_send JOB_PUBLISH
//!   ├─ drop undelivered, save_load(job, recipients)
//!   └─ MasterEvent::JobPublished
//!
//! JOB_RETURN ─→ submit_return(session_id, jid, frame)
//!   ├─ session must be current        SessionNotFound
//!   ├─ frame opens under the session  ReplayDetected / Channel
//!   ├─ minion must be a recipient     UnauthorizedReturn
//!   ├─ first return only              DuplicateReturn
//!   └─ save_return ─→ job_cache/<jid>/<minion>/return
//! ```
//!
//! The submitter of a return is always the session's bound minion; nothing
//! in the frame can claim another identity.
//!
//! ## Crate Structure (Hexagonal Architecture)
//!
//! - `domain/` - job types, target matching, JID generation, errors
//! - `ports/` - `JobCache` (outbound)
//! - `adapters/` - local filesystem and memory job caches
//! - `service/` - `JobBus`

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

pub use adapters::local::{LocalJobCache, ARCHIVE_DIR, EVENTS_DIR, EVENTS_FILE, JOB_CACHE_DIR, LOAD_FILE, RETURN_FILE};
pub use adapters::memory::MemoryJobCache;
pub use domain::errors::{JobBusError, JobCacheError};
pub use domain::jid::JidGenerator;
pub use domain::job::{DeliveryHandle, JobLoad, JobRequest, JobSummary, RecordedEvent, FIND_JOB_FUN};
pub use domain::target::TargetMatcher;
pub use ports::outbound::JobCache;
pub use service::{JobBus, JobBusConfig};
