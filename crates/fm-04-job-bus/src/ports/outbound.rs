//! # Outbound Ports (Driven Ports)
//!
//! The job cache (returner): durable job loads, returns and the event
//! archive.
//!
//! Production: [`LocalJobCache`](crate::LocalJobCache)
//! Testing: [`MemoryJobCache`](crate::MemoryJobCache)

use crate::domain::errors::JobCacheError;
use crate::domain::job::{JobLoad, RecordedEvent};
use shared_types::{Job, JobId, JobReturn, MinionId};
use std::collections::BTreeMap;

/// Job cache operations.
pub trait JobCache: Send + Sync {
    /// Reserve `passed`, or allocate and reserve a fresh JID.
    ///
    /// A passed JID that already names a job (loaded, holding returns, or
    /// reserved) is `JidTaken`; reservation is atomic, so of two callers
    /// passing the same JID exactly one succeeds.
    fn prep_jid(&self, passed: Option<JobId>) -> Result<JobId, JobCacheError>;

    /// Store (or replace) the load of `job` with its recipients.
    fn save_load(&self, job: &Job, minions: &[MinionId]) -> Result<(), JobCacheError>;

    /// The stored load, if any.
    fn get_load(&self, jid: &JobId) -> Result<Option<JobLoad>, JobCacheError>;

    /// Store a return. Returns are immutable; a second one for the same
    /// minion and job is `DuplicateReturn`.
    fn save_return(&self, ret: &JobReturn) -> Result<(), JobCacheError>;

    /// All returns of a job.
    fn get_jid(&self, jid: &JobId) -> Result<BTreeMap<MinionId, JobReturn>, JobCacheError>;

    /// Every stored load.
    fn get_jids(&self) -> Result<BTreeMap<JobId, JobLoad>, JobCacheError>;

    /// The `count` most recent loads, optionally without
    /// [`FIND_JOB_FUN`](crate::FIND_JOB_FUN) probes.
    fn get_jids_filter(
        &self,
        count: usize,
        filter_find_job: bool,
    ) -> Result<BTreeMap<JobId, JobLoad>, JobCacheError> {
        let loads = self.get_jids()?;
        Ok(loads
            .into_iter()
            .rev()
            .filter(|(_, load)| !filter_find_job || load.job.fun != crate::FIND_JOB_FUN)
            .take(count)
            .collect())
    }

    /// The latest return of `fun` from each minion.
    fn get_fun(&self, fun: &str) -> Result<BTreeMap<MinionId, JobReturn>, JobCacheError>;

    /// Every minion that ever returned.
    fn get_minions(&self) -> Result<Vec<MinionId>, JobCacheError>;

    /// Append events to the archive.
    fn event_return(&self, events: &[RecordedEvent]) -> Result<(), JobCacheError>;

    /// Archived events, oldest first.
    fn get_events(&self) -> Result<Vec<RecordedEvent>, JobCacheError>;

    /// Drop jobs and events older than `keep_jobs_hours`, moving them to the
    /// archive when `archive` is set. `0` keeps everything. Returns the
    /// number of jobs removed.
    fn clean_old_jobs(&self, keep_jobs_hours: u64, archive: bool) -> Result<usize, JobCacheError>;
}
