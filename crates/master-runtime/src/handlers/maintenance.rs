//! # Maintenance Handlers
//!
//! Periodic housekeeping and the event archive feed.
//!
//! | Handler | Period | Work |
//! |---------|--------|------|
//! | `SweepHandler` | `sessions.sweep_interval_secs` | idle sessions, expired jobs, stale challenges |
//! | `CacheCleaner` | `jobs.clean_interval_secs` | job cache retention |
//! | `EventReturnHandler` | per event | bus events into the event archive |

use std::sync::Arc;
use std::time::Duration;

use shared_bus::{MasterEvent, Subscription};
use shared_types::{JobId, MinionId};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::container::MasterContainer;

/// Events written to the archive per batch.
const EVENT_BATCH: usize = 64;

/// What one sweep removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Minions whose idle session was revoked.
    pub sessions: Vec<MinionId>,
    /// Jobs no longer tracked.
    pub jobs: Vec<JobId>,
    /// Expired challenges dropped.
    pub challenges: usize,
}

/// Revokes idle sessions, retires expired jobs and purges stale challenges.
pub struct SweepHandler {
    container: Arc<MasterContainer>,
}

impl SweepHandler {
    /// Create a sweep handler over the master's stores.
    pub fn new(container: Arc<MasterContainer>) -> Self {
        Self { container }
    }

    /// Run forever at the configured interval.
    pub async fn run(self) {
        let period = Duration::from_secs(self.container.config.sessions.sweep_interval_secs);
        info!(period_secs = period.as_secs(), "[fm-05] Sweep handler started");

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.sweep_once().await;
        }
    }

    /// One sweep pass.
    pub async fn sweep_once(&self) -> SweepReport {
        let config = &self.container.config;

        let sessions = self.container.sessions.sweep(config.sessions.idle_timeout_secs);
        let jobs = self
            .container
            .job_bus
            .sweep_expired(Duration::from_secs(config.jobs.job_timeout_secs))
            .await;
        let challenges = self.container.auth.purge_expired_challenges();

        let report = SweepReport {
            sessions,
            jobs,
            challenges,
        };
        if report != SweepReport::default() {
            debug!(
                sessions = report.sessions.len(),
                jobs = report.jobs.len(),
                challenges = report.challenges,
                "Sweep complete"
            );
        }
        report
    }
}

/// Applies the job cache retention window.
pub struct CacheCleaner {
    container: Arc<MasterContainer>,
}

impl CacheCleaner {
    /// Create a cleaner for the master's job cache.
    pub fn new(container: Arc<MasterContainer>) -> Self {
        Self { container }
    }

    /// Run forever at the configured interval. The first pass runs at start.
    pub async fn run(self) {
        let jobs = &self.container.config.jobs;
        if jobs.keep_jobs_hours == 0 {
            info!("[fm-04] keep_jobs_hours is 0, job cache is never cleaned");
            return;
        }

        let mut ticker = tokio::time::interval(Duration::from_secs(jobs.clean_interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.clean_once().await;
        }
    }

    /// One cleaning pass on the blocking pool. Returns the jobs removed.
    pub async fn clean_once(&self) -> usize {
        let bus = Arc::clone(&self.container.job_bus);
        match tokio::task::spawn_blocking(move || bus.clean_old_jobs()).await {
            Ok(Ok(removed)) => {
                if removed > 0 {
                    info!(removed, "[fm-04] Old jobs cleaned");
                }
                removed
            }
            Ok(Err(e)) => {
                error!(error = %e, "[fm-04] Job cache cleaning failed");
                0
            }
            Err(e) => {
                error!(error = %e, "[fm-04] Job cache cleaner panicked");
                0
            }
        }
    }
}

/// Writes every bus event to the event archive.
pub struct EventReturnHandler {
    container: Arc<MasterContainer>,
    subscription: Subscription,
}

impl EventReturnHandler {
    /// `subscription` should be taken before any event of interest is
    /// published.
    pub fn new(container: Arc<MasterContainer>, subscription: Subscription) -> Self {
        Self {
            container,
            subscription,
        }
    }

    /// Run until the bus closes.
    pub async fn run(mut self) {
        info!("[fm-04] Event return handler started");
        while let Some(first) = self.subscription.recv().await {
            let mut batch = vec![first];
            while batch.len() < EVENT_BATCH {
                match self.subscription.try_recv() {
                    Ok(Some(event)) => batch.push(event),
                    Ok(None) | Err(_) => break,
                }
            }
            self.record(&batch).await;
        }
        debug!("[fm-04] Event bus closed, event return handler stopped");
    }

    async fn record(&self, batch: &[MasterEvent]) {
        let bus = Arc::clone(&self.container.job_bus);
        let events = batch.to_vec();
        let count = events.len();
        match tokio::task::spawn_blocking(move || bus.record_events(&events)).await {
            Ok(Ok(())) => debug!(count, "[fm-04] Events archived"),
            Ok(Err(e)) => warn!(count, error = %e, "[fm-04] Events could not be archived"),
            Err(e) => error!(error = %e, "[fm-04] Event archive task panicked"),
        }
    }
}
