//! Record of previous CI failures for one pull request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::CIResult;

/// Oldest entries are dropped beyond this many.
const MAX_ENTRIES: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Sorted, de-duplicated names of failed and cancelled jobs.
    pub pattern: Vec<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CIFailureHistory {
    #[serde(default)]
    entries: Vec<HistoryEntry>,
}

impl CIFailureHistory {
    /// Failure signature of a result: every failed or cancelled job, sorted.
    pub fn pattern_of(result: &CIResult) -> Vec<String> {
        let mut pattern: Vec<String> = result
            .failed_jobs
            .iter()
            .chain(&result.cancelled_jobs)
            .cloned()
            .collect();
        pattern.sort();
        pattern.dedup();
        pattern
    }

    /// Append the failure signature of `result`; returns how many
    /// consecutive entries (including this one) share it.
    pub fn record(&mut self, result: &CIResult) -> u32 {
        let pattern = Self::pattern_of(result);
        self.entries.push(HistoryEntry {
            pattern: pattern.clone(),
            recorded_at: Utc::now(),
        });
        if self.entries.len() > MAX_ENTRIES {
            let excess = self.entries.len() - MAX_ENTRIES;
            self.entries.drain(..excess);
        }
        self.consecutive_count(&pattern)
    }

    /// Number of most-recent entries equal to `pattern`.
    pub fn consecutive_count(&self, pattern: &[String]) -> u32 {
        self.entries
            .iter()
            .rev()
            .take_while(|entry| entry.pattern == pattern)
            .count() as u32
    }

    /// Whether `pattern` has recurred at least `threshold` times in a row.
    pub fn is_persistent(&self, pattern: &[String], threshold: u32) -> bool {
        self.consecutive_count(pattern) >= threshold
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ci::CIStatus;

    fn failure(failed: &[&str], cancelled: &[&str]) -> CIResult {
        CIResult {
            status: CIStatus::Failure,
            failed_jobs: failed.iter().map(|s| s.to_string()).collect(),
            cancelled_jobs: cancelled.iter().map(|s| s.to_string()).collect(),
            raw: String::new(),
        }
    }

    #[test]
    fn test_pattern_is_order_independent() {
        let a = CIFailureHistory::pattern_of(&failure(&["test", "build"], &["lint"]));
        let b = CIFailureHistory::pattern_of(&failure(&["build"], &["lint", "test"]));
        assert_eq!(a, b);
        assert_eq!(a, vec!["build", "lint", "test"]);
    }

    #[test]
    fn test_consecutive_count_resets_on_new_pattern() {
        let mut history = CIFailureHistory::default();
        assert_eq!(history.record(&failure(&["build"], &[])), 1);
        assert_eq!(history.record(&failure(&["build"], &[])), 2);
        assert_eq!(history.record(&failure(&["lint"], &[])), 1);
        assert_eq!(history.record(&failure(&["build"], &[])), 1);
        assert_eq!(history.len(), 4);
    }

    #[test]
    fn test_is_persistent_at_threshold() {
        let mut history = CIFailureHistory::default();
        let result = failure(&["build"], &["deploy"]);
        history.record(&result);
        history.record(&result);
        let pattern = CIFailureHistory::pattern_of(&result);
        assert!(!history.is_persistent(&pattern, 3));
        history.record(&result);
        assert!(history.is_persistent(&pattern, 3));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = CIFailureHistory::default();
        for _ in 0..(MAX_ENTRIES + 10) {
            history.record(&failure(&["build"], &[]));
        }
        assert_eq!(history.len(), MAX_ENTRIES);
    }

    #[test]
    fn test_clear() {
        let mut history = CIFailureHistory::default();
        history.record(&failure(&["build"], &[]));
        history.clear();
        assert!(history.is_empty());
    }
}
