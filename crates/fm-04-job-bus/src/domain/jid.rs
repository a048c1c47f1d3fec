//! # JID Generation
//!
//! Generated JIDs are the UTC time as `YYYYMMDDhhmmssffffff`. Two JIDs from
//! one generator never collide: when the clock has not moved past the last
//! JID, the next one is the last plus one microsecond.

use crate::domain::errors::JobCacheError;
use chrono::Utc;
use parking_lot::Mutex;
use shared_types::JobId;

const JID_FORMAT: &str = "%Y%m%d%H%M%S%6f";

/// Strictly increasing JID source.
#[derive(Debug, Default)]
pub struct JidGenerator {
    last: Mutex<u128>,
}

impl JidGenerator {
    /// New generator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next JID.
    ///
    /// # Errors
    ///
    /// `JidExhausted` if the formatted value is not a valid JID.
    pub fn next(&self) -> Result<JobId, JobCacheError> {
        let now = Utc::now()
            .format(JID_FORMAT)
            .to_string()
            .parse::<u128>()
            .unwrap_or(0);
        let mut last = self.last.lock();
        let next = now.max(*last + 1);
        *last = next;
        JobId::parse(&format!("{next:020}")).map_err(|_| JobCacheError::JidExhausted)
    }
}
