//! # Job Bus Service
//!
//! Fans jobs out to live sessions and accepts their returns.
//!
//! A job is tracked and its load persisted before the first `JOB_PUBLISH`
//! is queued, so a return can never arrive ahead of its job. Cache writes
//! run on the blocking pool.

use crate::domain::errors::{JobBusError, JobCacheError};
use crate::domain::job::{DeliveryHandle, JobRequest, JobSummary, RecordedEvent};
use crate::domain::target::TargetMatcher;
use crate::ports::outbound::JobCache;
use fm_03_secure_channel::{Direction, SecureChannel};
use fm_05_session_registry::SessionRegistry;
use parking_lot::Mutex;
use shared_bus::{EventPublisher, MasterEvent};
use shared_types::{
    Job, JobId, JobResult, JobReturn, MinionId, SealedFrame, SessionId, TimeSource, Timestamp,
    WireMessage,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};


/// Job bus tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobBusConfig {
    /// How long a job is tracked waiting for returns.
    pub job_timeout: Duration,
    /// Hours a job stays in the cache; `0` keeps jobs forever.
    pub keep_jobs_hours: u64,
    /// Move cleaned jobs to the archive instead of deleting them.
    pub archive_jobs: bool,
}

impl JobBusConfig {
    /// Default tracking window.
    pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(60);
    /// Default cache retention.
    pub const DEFAULT_KEEP_JOBS_HOURS: u64 = 24;
}

impl Default for JobBusConfig {
    fn default() -> Self {
        Self {
            job_timeout: Self::DEFAULT_JOB_TIMEOUT,
            keep_jobs_hours: Self::DEFAULT_KEEP_JOBS_HOURS,
            archive_jobs: false,
        }
    }
}

/// An in-flight job.
struct Tracked {
    fun: String,
    issued_at: Timestamp,
    expected: BTreeSet<MinionId>,
    returned: BTreeSet<MinionId>,
    complete: watch::Sender<bool>,
}

impl Tracked {
    fn missing(&self) -> Vec<MinionId> {
        self.expected.difference(&self.returned).cloned().collect()
    }

    fn is_complete(&self) -> bool {
        self.expected.is_subset(&self.returned)
    }
}

/// Publishes jobs and collects returns.
pub struct JobBus {
    sessions: Arc<SessionRegistry>,
    cache: Arc<dyn JobCache>,
    events: Arc<dyn EventPublisher>,
    time_source: Arc<dyn TimeSource>,
    config: JobBusConfig,
    jobs: Mutex<HashMap<JobId, Tracked>>,
}

impl JobBus {
    /// Create a new job bus.
    pub fn new(
        sessions: Arc<SessionRegistry>,
        cache: Arc<dyn JobCache>,
        events: Arc<dyn EventPublisher>,
        time_source: Arc<dyn TimeSource>,
        config: JobBusConfig,
    ) -> Self {
        Self {
            sessions,
            cache,
            events,
            time_source,
            config,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// The job cache behind this bus.
    #[must_use]
    pub fn cache(&self) -> &Arc<dyn JobCache> {
        &self.cache
    }

    /// Settings.
    #[must_use]
    pub fn config(&self) -> &JobBusConfig {
        &self.config
    }

    /// Number of jobs being tracked.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Run a job cache call on the blocking pool.
    async fn on_cache<T, F>(&self, op: F) -> Result<T, JobCacheError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn JobCache) -> Result<T, JobCacheError> + Send + 'static,
    {
        let cache = Arc::clone(&self.cache);
        tokio::task::spawn_blocking(move || op(cache.as_ref()))
            .await
            .map_err(|e| JobCacheError::Io(format!("job cache task failed: {e}")))?
    }

    // =========================================================================
    // PUBLISH
    // =========================================================================

    /// Publish a job to every live session its target matches.
    ///
    /// Never waits on a recipient: a full or closed outbox leaves that
    /// minion in `undelivered`. A target matching nobody is still a job.
    ///
    /// # Errors
    ///
    /// `JidInUse` for a caller JID that already names a job, `Cache` on
    /// storage failure. Nothing is sent when either is returned.
    pub async fn publish(&self, request: JobRequest) -> Result<DeliveryHandle, JobBusError> {
        let passed = request.jid.clone();
        let jid = self.on_cache(move |cache| cache.prep_jid(passed)).await?;

        let job = Job {
            jid: jid.clone(),
            target: request.target,
            fun: request.fun,
            arg: request.arg,
            user: request.user,
            metadata: request.metadata,
            issued_at: self.time_source.now(),
        };
        let payload = job.payload();

        let matcher = TargetMatcher::compile(&job.target);
        let mut matched = self.sessions.sessions();
        matched.retain(|s| matcher.matches(s.minion_id()));
        matched.sort_by(|a, b| a.minion_id().cmp(b.minion_id()));
        let targeted: Vec<MinionId> = matched.iter().map(|s| s.minion_id().clone()).collect();

        {
            let mut jobs = self.jobs.lock();
            if jobs.contains_key(&jid) {
                return Err(JobBusError::JidInUse(jid));
            }
            let (complete, _) = watch::channel(targeted.is_empty());
            jobs.insert(
                jid.clone(),
                Tracked {
                    fun: job.fun.clone(),
                    issued_at: job.issued_at,
                    expected: targeted.iter().cloned().collect(),
                    returned: BTreeSet::new(),
                    complete,
                },
            );
        }
        let (stored, minions) = (job.clone(), targeted.clone());
        if let Err(e) = self.on_cache(move |cache| cache.save_load(&stored, &minions)).await {
            self.jobs.lock().remove(&jid);
            return Err(e.into());
        }

        let mut recipients = Vec::new();
        let mut undelivered = Vec::new();
        for session in &matched {
            let minion_id = session.minion_id().clone();
            let sent = SecureChannel::seal_json(session.channel(), Direction::MasterToMinion, &payload)
                .map_err(|e| e.to_string())
                .and_then(|frame| {
                    session
                        .try_send(WireMessage::JobPublish {
                            jid: jid.clone(),
                            frame,
                        })
                        .map_err(|e| e.to_string())
                });
            match sent {
                Ok(()) => recipients.push(minion_id),
                Err(reason) => {
                    warn!(jid = %jid, minion = %minion_id, reason = %reason, "[fm-04] Job not delivered");
                    undelivered.push(minion_id);
                }
            }
        }

        // Recipients may already have returned; dropping the undelivered
        // ones can complete the job here.
        let mut completed = false;
        if !undelivered.is_empty() {
            if let Some(tracked) = self.jobs.lock().get_mut(&jid) {
                for minion_id in &undelivered {
                    tracked.expected.remove(minion_id);
                }
                completed = tracked.is_complete() && !tracked.returned.is_empty();
                tracked.complete.send_replace(tracked.is_complete());
            }
            let (stored, minions) = (job.clone(), recipients.clone());
            if let Err(e) = self.on_cache(move |cache| cache.save_load(&stored, &minions)).await {
                warn!(jid = %jid, error = %e, "[fm-04] Load still lists undelivered minions");
            }
        }

        info!(
            jid = %jid,
            fun = %job.fun,
            target = job.target.kind(),
            recipients = recipients.len(),
            undelivered = undelivered.len(),
            "[fm-04] Job published"
        );
        self.events
            .publish(MasterEvent::JobPublished {
                jid: jid.clone(),
                fun: job.fun,
                recipients: recipients.clone(),
            })
            .await;
        if completed {
            info!(jid = %jid, "[fm-04] All returns received");
            self.events
                .publish(MasterEvent::JobCompleted {
                    jid: jid.clone(),
                    missing: Vec::new(),
                })
                .await;
        }

        Ok(DeliveryHandle {
            jid,
            recipients,
            undelivered,
        })
    }

    // =========================================================================
    // RETURNS
    // =========================================================================

    /// Accept a `JOB_RETURN` received on `session_id`.
    ///
    /// The submitter is the session's bound minion.
    ///
    /// # Errors
    ///
    /// `SessionNotFound`, `ReplayDetected`, `Channel`, `UnauthorizedReturn`,
    /// `DuplicateReturn`, or `Cache`.
    pub async fn submit_return(
        &self,
        session_id: SessionId,
        jid: &JobId,
        frame: &SealedFrame,
    ) -> Result<JobReturn, JobBusError> {
        let session = self
            .sessions
            .lookup_session(session_id)
            .ok_or(JobBusError::SessionNotFound(session_id))?;
        let minion_id = session.minion_id().clone();

        let result: JobResult =
            SecureChannel::open_json(session.channel(), Direction::MinionToMaster, frame)
                .inspect_err(|e| {
                    warn!(minion = %minion_id, jid = %jid, error = %e, "[fm-04] Return frame refused");
                })?;
        let now = self.time_source.now();
        session.touch(now);

        let fun = self.authorize(jid, &minion_id).await?;
        let ret = JobReturn {
            jid: jid.clone(),
            minion_id: minion_id.clone(),
            fun,
            success: result.success,
            output: result.output,
            received_at: now,
        };
        let stored = ret.clone();
        self.on_cache(move |cache| cache.save_return(&stored))
            .await
            .inspect_err(|e| {
                warn!(minion = %minion_id, jid = %jid, error = %e, "[fm-04] Return not stored");
            })?;

        let completed = {
            let mut jobs = self.jobs.lock();
            match jobs.get_mut(jid) {
                Some(tracked) => {
                    let was_complete = tracked.is_complete();
                    tracked.returned.insert(minion_id.clone());
                    tracked.complete.send_replace(tracked.is_complete());
                    !was_complete && tracked.is_complete()
                }
                None => false,
            }
        };

        debug!(jid = %jid, minion = %minion_id, success = ret.success, "[fm-04] Return stored");
        self.events
            .publish(MasterEvent::ReturnReceived {
                jid: jid.clone(),
                minion_id,
                success: ret.success,
            })
            .await;
        if completed {
            info!(jid = %jid, "[fm-04] All returns received");
            self.events
                .publish(MasterEvent::JobCompleted {
                    jid: jid.clone(),
                    missing: Vec::new(),
                })
                .await;
        }

        Ok(ret)
    }

    /// Check `minion_id` was a recipient of `jid`; returns the job's function.
    async fn authorize(&self, jid: &JobId, minion_id: &MinionId) -> Result<String, JobBusError> {
        let unauthorized = || JobBusError::UnauthorizedReturn {
            jid: jid.clone(),
            minion_id: minion_id.clone(),
        };

        let tracked = self.jobs.lock().get(jid).map(|tracked| {
            if !tracked.expected.contains(minion_id) {
                Err(unauthorized())
            } else if tracked.returned.contains(minion_id) {
                Err(JobBusError::DuplicateReturn {
                    jid: jid.clone(),
                    minion_id: minion_id.clone(),
                })
            } else {
                Ok(tracked.fun.clone())
            }
        });
        if let Some(decision) = tracked {
            return decision;
        }

        // No longer tracked: a late return is accepted if the load lists it.
        let lookup = jid.clone();
        match self.on_cache(move |cache| cache.get_load(&lookup)).await? {
            Some(load) if load.minions.contains(minion_id) => Ok(load.job.fun),
            _ => Err(unauthorized()),
        }
    }

    // =========================================================================
    // COMPLETION
    // =========================================================================

    /// Wait until every recipient of `jid` has returned or `timeout`
    /// elapses, then summarize.
    ///
    /// # Errors
    ///
    /// `UnknownJob` if no load exists, `Cache` on storage failure.
    pub async fn collect(&self, jid: &JobId, timeout: Duration) -> Result<JobSummary, JobBusError> {
        let waiter = self.jobs.lock().get(jid).map(|tracked| tracked.complete.subscribe());

        if let Some(mut complete) = waiter {
            let done = tokio::time::timeout(timeout, async {
                // The sender is only dropped by sweep; stop waiting then too.
                let _ = complete.wait_for(|done| *done).await;
            })
            .await;
            if done.is_err() {
                debug!(jid = %jid, "[fm-04] Collect timed out");
            }
        }

        self.summary(jid)
    }

    /// Current returns and missing recipients of `jid`.
    ///
    /// # Errors
    ///
    /// `UnknownJob` if no load exists.
    pub fn summary(&self, jid: &JobId) -> Result<JobSummary, JobBusError> {
        let load = self
            .cache
            .get_load(jid)?
            .ok_or_else(|| JobBusError::UnknownJob(jid.clone()))?;
        let returns = self.cache.get_jid(jid)?;
        let missing = load
            .minions
            .into_iter()
            .filter(|m| !returns.contains_key(m))
            .collect();
        Ok(JobSummary {
            jid: jid.clone(),
            returns,
            missing,
        })
    }

    /// Stop tracking jobs that are complete or older than `job_timeout`.
    ///
    /// Returns the JIDs dropped. Jobs that expired with missing returns are
    /// announced as `JobCompleted`.
    pub async fn sweep_expired(&self, job_timeout: Duration) -> Vec<JobId> {
        let now = self.time_source.now();
        let max_age = job_timeout.as_secs();

        let dropped: Vec<(JobId, Tracked)> = {
            let mut jobs = self.jobs.lock();
            let expired: Vec<JobId> = jobs
                .iter()
                .filter(|(_, t)| t.is_complete() || now.saturating_elapsed_since(t.issued_at) >= max_age)
                .map(|(jid, _)| jid.clone())
                .collect();
            expired
                .into_iter()
                .filter_map(|jid| jobs.remove(&jid).map(|t| (jid, t)))
                .collect()
        };

        let mut jids = Vec::with_capacity(dropped.len());
        for (jid, tracked) in dropped {
            if !tracked.is_complete() {
                let missing = tracked.missing();
                info!(jid = %jid, missing = missing.len(), "[fm-04] Job expired with missing returns");
                self.events
                    .publish(MasterEvent::JobCompleted {
                        jid: jid.clone(),
                        missing,
                    })
                    .await;
            }
            jids.push(jid);
        }
        jids
    }

    /// Archive bus events through the job cache.
    ///
    /// # Errors
    ///
    /// `Cache` on storage failure.
    pub fn record_events(&self, events: &[MasterEvent]) -> Result<(), JobBusError> {
        let now = self.time_source.now();
        let recorded: Vec<RecordedEvent> = events
            .iter()
            .map(|e| RecordedEvent::from_event(e, now))
            .collect();
        self.cache.event_return(&recorded)?;
        Ok(())
    }

    /// Apply the cache retention settings.
    ///
    /// # Errors
    ///
    /// `Cache` on storage failure.
    pub fn clean_old_jobs(&self) -> Result<usize, JobBusError> {
        Ok(self
            .cache
            .clean_old_jobs(self.config.keep_jobs_hours, self.config.archive_jobs)?)
    }
}
