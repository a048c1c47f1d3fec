//! # Memory Job Cache
//!
//! Same semantics as the local cache, kept in maps. Archived entries are
//! retained separately so tests can observe `clean_old_jobs(.., true)`.

use crate::domain::errors::JobCacheError;
use crate::domain::jid::JidGenerator;
use crate::domain::job::{JobLoad, RecordedEvent};
use crate::ports::outbound::JobCache;
use parking_lot::RwLock;
use shared_types::{Job, JobId, JobReturn, MinionId, TimeSource};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Default)]
struct Tables {
    reserved: BTreeSet<JobId>,
    loads: BTreeMap<JobId, JobLoad>,
    returns: BTreeMap<JobId, BTreeMap<MinionId, JobReturn>>,
    events: Vec<RecordedEvent>,
    archived_jobs: BTreeMap<JobId, JobLoad>,
    archived_events: Vec<RecordedEvent>,
}

/// In-memory `JobCache`.
pub struct MemoryJobCache {
    tables: RwLock<Tables>,
    jids: JidGenerator,
    time_source: Arc<dyn TimeSource>,
}

impl MemoryJobCache {
    /// Empty cache.
    #[must_use]
    pub fn new(time_source: Arc<dyn TimeSource>) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            jids: JidGenerator::new(),
            time_source,
        }
    }

    /// JIDs moved to the archive by `clean_old_jobs`.
    #[must_use]
    pub fn archived_jids(&self) -> Vec<JobId> {
        self.tables.read().archived_jobs.keys().cloned().collect()
    }

    /// Events moved to the archive by `clean_old_jobs`.
    #[must_use]
    pub fn archived_events(&self) -> Vec<RecordedEvent> {
        self.tables.read().archived_events.clone()
    }
}

impl JobCache for MemoryJobCache {
    fn prep_jid(&self, passed: Option<JobId>) -> Result<JobId, JobCacheError> {
        let jid = match passed {
            Some(jid) => jid,
            None => self.jids.next()?,
        };
        let mut tables = self.tables.write();
        if tables.loads.contains_key(&jid) || tables.returns.contains_key(&jid) {
            return Err(JobCacheError::JidTaken(jid));
        }
        if !tables.reserved.insert(jid.clone()) {
            return Err(JobCacheError::JidTaken(jid));
        }
        Ok(jid)
    }

    fn save_load(&self, job: &Job, minions: &[MinionId]) -> Result<(), JobCacheError> {
        self.tables.write().loads.insert(
            job.jid.clone(),
            JobLoad {
                job: job.clone(),
                minions: minions.to_vec(),
            },
        );
        Ok(())
    }

    fn get_load(&self, jid: &JobId) -> Result<Option<JobLoad>, JobCacheError> {
        Ok(self.tables.read().loads.get(jid).cloned())
    }

    fn save_return(&self, ret: &JobReturn) -> Result<(), JobCacheError> {
        let mut tables = self.tables.write();
        let returns = tables.returns.entry(ret.jid.clone()).or_default();
        if returns.contains_key(&ret.minion_id) {
            return Err(JobCacheError::DuplicateReturn {
                jid: ret.jid.clone(),
                minion_id: ret.minion_id.clone(),
            });
        }
        returns.insert(ret.minion_id.clone(), ret.clone());
        Ok(())
    }

    fn get_jid(&self, jid: &JobId) -> Result<BTreeMap<MinionId, JobReturn>, JobCacheError> {
        Ok(self.tables.read().returns.get(jid).cloned().unwrap_or_default())
    }

    fn get_jids(&self) -> Result<BTreeMap<JobId, JobLoad>, JobCacheError> {
        Ok(self.tables.read().loads.clone())
    }

    fn get_fun(&self, fun: &str) -> Result<BTreeMap<MinionId, JobReturn>, JobCacheError> {
        let tables = self.tables.read();
        let mut latest = BTreeMap::new();
        // JIDs iterate in ascending order, so later inserts win.
        for returns in tables.returns.values() {
            for ret in returns.values().filter(|r| r.fun == fun) {
                latest.insert(ret.minion_id.clone(), ret.clone());
            }
        }
        Ok(latest)
    }

    fn get_minions(&self) -> Result<Vec<MinionId>, JobCacheError> {
        let tables = self.tables.read();
        let mut minions: Vec<MinionId> = tables
            .returns
            .values()
            .flat_map(|returns| returns.keys().cloned())
            .collect();
        minions.sort();
        minions.dedup();
        Ok(minions)
    }

    fn event_return(&self, events: &[RecordedEvent]) -> Result<(), JobCacheError> {
        self.tables.write().events.extend_from_slice(events);
        Ok(())
    }

    fn get_events(&self) -> Result<Vec<RecordedEvent>, JobCacheError> {
        Ok(self.tables.read().events.clone())
    }

    fn clean_old_jobs(&self, keep_jobs_hours: u64, archive: bool) -> Result<usize, JobCacheError> {
        if keep_jobs_hours == 0 {
            return Ok(0);
        }
        let now = self.time_source.now();
        let max_age = keep_jobs_hours.saturating_mul(3600);

        let mut tables = self.tables.write();
        let expired: Vec<JobId> = tables
            .loads
            .iter()
            .filter(|(_, load)| now.saturating_elapsed_since(load.job.issued_at) > max_age)
            .map(|(jid, _)| jid.clone())
            .collect();

        for jid in &expired {
            tables.reserved.remove(jid);
            tables.returns.remove(jid);
            if let Some(load) = tables.loads.remove(jid) {
                if archive {
                    tables.archived_jobs.insert(jid.clone(), load);
                }
            }
        }

        let (old, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut tables.events)
            .into_iter()
            .partition(|e| now.saturating_elapsed_since(e.recorded_at) > max_age);
        tables.events = kept;
        if archive {
            tables.archived_events.extend(old);
        }

        Ok(expired.len())
    }
}
