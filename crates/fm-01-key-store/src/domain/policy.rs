//! # Auto-Accept Policy
//!
//! Decides whether a key seen for the first time is stored as `accepted`
//! instead of `pending`. Only first contact is affected; existing records
//! never change state through the policy.

use serde::{Deserialize, Serialize};
use shared_types::{GlobPattern, MinionId};
use tracing::warn;

/// First-contact acceptance rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "patterns")]
pub enum AutoAcceptPolicy {
    /// Every new key waits for an operator.
    #[default]
    Off,
    /// Every new key is accepted. Only for closed lab networks.
    All,
    /// New keys whose ID matches any of these globs are accepted.
    Matching(Vec<String>),
}

impl AutoAcceptPolicy {
    /// Parse the compact config form: `off`, `all`, or a comma-separated
    /// glob list.
    #[must_use]
    pub fn from_config_str(value: &str) -> Self {
        match value.trim() {
            "" | "off" | "false" | "no" => AutoAcceptPolicy::Off,
            "all" | "true" | "yes" => AutoAcceptPolicy::All,
            list => AutoAcceptPolicy::Matching(
                list.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_owned)
                    .collect(),
            ),
        }
    }

    /// Whether a first-contact key for `minion_id` is accepted.
    ///
    /// Patterns that fail to compile match nothing.
    #[must_use]
    pub fn allows(&self, minion_id: &MinionId) -> bool {
        match self {
            AutoAcceptPolicy::Off => false,
            AutoAcceptPolicy::All => true,
            AutoAcceptPolicy::Matching(patterns) => patterns.iter().any(|p| {
                match GlobPattern::new(p) {
                    Ok(glob) => glob.is_match(minion_id.as_str()),
                    Err(e) => {
                        warn!(pattern = %p, error = %e, "[fm-01] Ignoring invalid auto-accept pattern");
                        false
                    }
                }
            }),
        }
    }
}
