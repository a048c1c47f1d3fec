//! # Domain Errors

use fm_03_secure_channel::ChannelError;
use shared_types::{JobId, MinionId, SessionId};
use thiserror::Error;

/// Job cache failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobCacheError {
    /// Filesystem failure.
    #[error("Job cache I/O error: {0}")]
    Io(String),

    /// A stored document did not decode.
    #[error("Corrupt job cache entry {path}: {reason}")]
    Corrupt {
        /// Offending file.
        path: String,
        /// Decoder message.
        reason: String,
    },

    /// A return for this minion and job is already stored.
    #[error("Return from {minion_id} for job {jid} already stored")]
    DuplicateReturn {
        /// Job identifier.
        jid: JobId,
        /// Submitter.
        minion_id: MinionId,
    },

    /// A caller-supplied JID already names a job in the cache.
    #[error("Job ID {0} already exists")]
    JidTaken(JobId),

    /// No free JID could be generated.
    #[error("Could not allocate a job ID")]
    JidExhausted,
}

impl From<std::io::Error> for JobCacheError {
    fn from(e: std::io::Error) -> Self {
        JobCacheError::Io(e.to_string())
    }
}

/// Job bus failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobBusError {
    /// The session is not (or no longer) the current one.
    #[error("Session {0} not found")]
    SessionNotFound(SessionId),

    /// The return frame was already seen.
    #[error("Replay detected: seq {seq} <= last accepted {last_accepted}")]
    ReplayDetected {
        /// Sequence carried by the frame.
        seq: u64,
        /// Highest sequence accepted on this session.
        last_accepted: u64,
    },

    /// The frame did not open or decode.
    #[error("Channel error: {0}")]
    Channel(ChannelError),

    /// The minion was not a recipient of the job.
    #[error("{minion_id} is not a recipient of job {jid}")]
    UnauthorizedReturn {
        /// Job identifier.
        jid: JobId,
        /// Submitter.
        minion_id: MinionId,
    },

    /// The minion already returned for the job.
    #[error("Duplicate return from {minion_id} for job {jid}")]
    DuplicateReturn {
        /// Job identifier.
        jid: JobId,
        /// Submitter.
        minion_id: MinionId,
    },

    /// No such job.
    #[error("Unknown job {0}")]
    UnknownJob(JobId),

    /// A caller-supplied JID names an existing job.
    #[error("Job ID {0} is already in use")]
    JidInUse(JobId),

    /// Job cache failure.
    #[error(transparent)]
    Cache(JobCacheError),
}

impl From<ChannelError> for JobBusError {
    fn from(e: ChannelError) -> Self {
        match e {
            ChannelError::ReplayDetected { seq, last_accepted } => {
                JobBusError::ReplayDetected { seq, last_accepted }
            }
            other => JobBusError::Channel(other),
        }
    }
}

impl From<JobCacheError> for JobBusError {
    fn from(e: JobCacheError) -> Self {
        match e {
            JobCacheError::DuplicateReturn { jid, minion_id } => {
                JobBusError::DuplicateReturn { jid, minion_id }
            }
            JobCacheError::JidTaken(jid) => JobBusError::JidInUse(jid),
            other => JobBusError::Cache(other),
        }
    }
}
