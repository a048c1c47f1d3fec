//! # Target Matching
//!
//! Compiles a [`TargetSpec`] once per publish and tests each live session's
//! ID against it. A pattern that does not compile matches nothing.

use regex::Regex;
use shared_types::{log_preview, GlobPattern, MinionId, TargetSpec};
use std::collections::HashSet;
use tracing::warn;

/// A compiled target.
#[derive(Debug, Clone)]
pub enum TargetMatcher {
    /// One exact ID.
    Exact(String),
    /// Shell-style glob.
    Glob(GlobPattern),
    /// Explicit set of IDs.
    List(HashSet<String>),
    /// Regex anchored at both ends.
    Regex(Regex),
    /// Invalid pattern.
    Nothing,
}

impl TargetMatcher {
    /// Compile `spec`, logging and matching nothing if it is invalid.
    #[must_use]
    pub fn compile(spec: &TargetSpec) -> Self {
        match spec {
            TargetSpec::Exact(id) => TargetMatcher::Exact(id.clone()),
            TargetSpec::List(ids) => TargetMatcher::List(ids.iter().cloned().collect()),
            TargetSpec::Glob(pattern) => match GlobPattern::new(pattern) {
                Ok(glob) => TargetMatcher::Glob(glob),
                Err(e) => {
                    warn!(pattern = %log_preview(pattern), error = %e, "[fm-04] Invalid glob target");
                    TargetMatcher::Nothing
                }
            },
            TargetSpec::Regex(pattern) => match Regex::new(&format!("^(?:{pattern})$")) {
                Ok(regex) => TargetMatcher::Regex(regex),
                Err(e) => {
                    warn!(pattern = %log_preview(pattern), error = %e, "[fm-04] Invalid regex target");
                    TargetMatcher::Nothing
                }
            },
        }
    }

    /// Whether `minion_id` is targeted.
    #[must_use]
    pub fn matches(&self, minion_id: &MinionId) -> bool {
        let id = minion_id.as_str();
        match self {
            TargetMatcher::Exact(exact) => exact == id,
            TargetMatcher::Glob(glob) => glob.is_match(id),
            TargetMatcher::List(ids) => ids.contains(id),
            TargetMatcher::Regex(regex) => regex.is_match(id),
            TargetMatcher::Nothing => false,
        }
    }

    /// The subset of `candidates` that is targeted, in input order.
    #[must_use]
    pub fn select<'a>(&self, candidates: impl IntoIterator<Item = &'a MinionId>) -> Vec<MinionId> {
        candidates
            .into_iter()
            .filter(|id| self.matches(id))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<MinionId> {
        raw.iter().map(|r| MinionId::parse(r).unwrap()).collect()
    }

    fn fleet() -> Vec<MinionId> {
        ids(&["db01", "web01", "web02", "web10.example.com"])
    }

    fn select(spec: TargetSpec) -> Vec<MinionId> {
        TargetMatcher::compile(&spec).select(&fleet())
    }

    #[test]
    fn test_exact() {
        assert_eq!(select(TargetSpec::Exact("web01".into())), ids(&["web01"]));
        assert!(select(TargetSpec::Exact("web".into())).is_empty());
    }

    #[test]
    fn test_glob() {
        assert_eq!(
            select(TargetSpec::Glob("web0?".into())),
            ids(&["web01", "web02"])
        );
        assert_eq!(
            select(TargetSpec::Glob("web*".into())),
            ids(&["web01", "web02", "web10.example.com"])
        );
        assert_eq!(select(TargetSpec::Glob("[!w]*".into())), ids(&["db01"]));
    }

    #[test]
    fn test_list_ignores_unknown_and_invalid_entries() {
        let spec = TargetSpec::List(vec!["db01".into(), "../../etc".into(), "nope".into()]);
        assert_eq!(select(spec), ids(&["db01"]));
    }

    #[test]
    fn test_regex_is_anchored() {
        assert_eq!(
            select(TargetSpec::Regex(r"web\d+".into())),
            ids(&["web01", "web02"])
        );
        assert_eq!(
            select(TargetSpec::Regex(r"web\d+\..*".into())),
            ids(&["web10.example.com"])
        );
    }

    #[test]
    fn test_invalid_patterns_match_nothing() {
        assert!(select(TargetSpec::Glob("web[".into())).is_empty());
        assert!(select(TargetSpec::Regex("web(".into())).is_empty());
    }
}
