//! # Job Entities

use serde::{Deserialize, Serialize};
use shared_bus::MasterEvent;
use shared_types::{Job, JobId, JobReturn, MinionId, TargetSpec, Timestamp};
use std::collections::BTreeMap;

/// Function name of the master's own job-lookup probes, hidden by
/// `get_jids_filter` on request.
pub const FIND_JOB_FUN: &str = "saltutil.find_job";

/// A job submission.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    /// Recipient selection.
    pub target: TargetSpec,
    /// Execution function name.
    pub fun: String,
    /// Positional arguments.
    pub arg: Vec<serde_json::Value>,
    /// Caller-chosen JID; generated when absent.
    pub jid: Option<JobId>,
    /// Submitting user.
    pub user: Option<String>,
    /// Free-form metadata stored with the load.
    pub metadata: serde_json::Value,
}

impl JobRequest {
    /// Request running `fun` on `target` with no arguments.
    #[must_use]
    pub fn new(target: TargetSpec, fun: impl Into<String>) -> Self {
        Self {
            target,
            fun: fun.into(),
            arg: Vec::new(),
            jid: None,
            user: None,
            metadata: serde_json::Value::Null,
        }
    }

    /// Set positional arguments.
    #[must_use]
    pub fn with_args(mut self, arg: Vec<serde_json::Value>) -> Self {
        self.arg = arg;
        self
    }

    /// Use a caller-supplied JID.
    #[must_use]
    pub fn with_jid(mut self, jid: JobId) -> Self {
        self.jid = Some(jid);
        self
    }

    /// Record the submitting user.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

/// The persisted description of a job (`.load.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLoad {
    /// The job as published.
    #[serde(flatten)]
    pub job: Job,
    /// Minions the job was delivered to.
    #[serde(default)]
    pub minions: Vec<MinionId>,
}

/// Result of `publish`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryHandle {
    /// Assigned JID.
    pub jid: JobId,
    /// Minions whose outbox accepted the job.
    pub recipients: Vec<MinionId>,
    /// Matched minions whose outbox was full or closed.
    pub undelivered: Vec<MinionId>,
}

/// Returns gathered for a job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSummary {
    /// Job identifier.
    pub jid: JobId,
    /// Returns received, by minion.
    pub returns: BTreeMap<MinionId, JobReturn>,
    /// Recipients that have not returned.
    pub missing: Vec<MinionId>,
}

impl JobSummary {
    /// Whether every recipient returned.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// One line of the event archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Slash-separated tag, e.g. `fm/job/<jid>/ret/<minion>`.
    pub tag: String,
    /// Event body.
    pub data: serde_json::Value,
    /// When the master recorded it.
    pub recorded_at: Timestamp,
}

impl RecordedEvent {
    /// Archive form of a bus event.
    #[must_use]
    pub fn from_event(event: &MasterEvent, recorded_at: Timestamp) -> Self {
        Self {
            tag: event.tag(),
            data: serde_json::to_value(event).unwrap_or(serde_json::Value::Null),
            recorded_at,
        }
    }
}
