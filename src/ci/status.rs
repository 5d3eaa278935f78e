//! Parsing `gh pr checks` payloads into a [`CIResult`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Overall CI state of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CIStatus {
    Pending,
    Success,
    Failure,
}

impl std::fmt::Display for CIStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CIStatus::Pending => "pending",
            CIStatus::Success => "success",
            CIStatus::Failure => "failure",
        };
        f.pad(s)
    }
}

/// Normalised state of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Passed,
    Failed,
    Cancelled,
    Pending,
}

impl JobState {
    /// Case-insensitive. Anything unrecognised counts as pending.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" | "skipped" | "neutral" => JobState::Passed,
            "failure" | "error" | "timed_out" | "startup_failure" | "action_required" => {
                JobState::Failed
            }
            "cancelled" | "stale" => JobState::Cancelled,
            _ => JobState::Pending,
        }
    }
}

/// One record of `gh pr checks --json name,state,startedAt,completedAt`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckRecord {
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    started_at: Option<String>,
    #[serde(default)]
    completed_at: Option<String>,
}

fn parse_records(raw: &str) -> Option<Vec<CheckRecord>> {
    serde_json::from_str(raw.trim()).ok()
}

/// Per-job detail used by the failure classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CIJobDetail {
    pub name: String,
    /// The state string exactly as reported.
    pub conclusion: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Only present when both timestamps parse and are ordered.
    pub duration: Option<Duration>,
}

fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

impl CIJobDetail {
    /// All job details in a raw payload. Malformed payloads yield nothing.
    pub fn parse_all(raw: &str) -> Vec<CIJobDetail> {
        parse_records(raw)
            .unwrap_or_default()
            .into_iter()
            .map(|record| {
                let started_at = parse_timestamp(record.started_at.as_deref());
                let completed_at = parse_timestamp(record.completed_at.as_deref());
                let duration = match (started_at, completed_at) {
                    (Some(start), Some(end)) => (end - start).to_std().ok(),
                    _ => None,
                };
                CIJobDetail {
                    name: record.name,
                    conclusion: record.state,
                    started_at,
                    completed_at,
                    duration,
                }
            })
            .collect()
    }
}

/// Job counts by normalised state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CiCounts {
    pub passed: usize,
    pub failed: usize,
    pub pending: usize,
    pub cancelled: usize,
}

impl CiCounts {
    pub fn from_raw(raw: &str) -> Self {
        let mut counts = CiCounts::default();
        for record in parse_records(raw).unwrap_or_default() {
            match JobState::parse(&record.state) {
                JobState::Passed => counts.passed += 1,
                JobState::Failed => counts.failed += 1,
                JobState::Cancelled => counts.cancelled += 1,
                JobState::Pending => counts.pending += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.pending + self.cancelled
    }
}

impl std::fmt::Display for CiCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} passed, {} failed, {} pending, {} cancelled",
            self.passed, self.failed, self.pending, self.cancelled
        )
    }
}

/// Result of one CI poll. Either fully parsed or defaulted to pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CIResult {
    pub status: CIStatus,
    pub failed_jobs: Vec<String>,
    pub cancelled_jobs: Vec<String>,
    pub raw: String,
}

impl CIResult {
    pub fn pending(raw: impl Into<String>) -> Self {
        Self {
            status: CIStatus::Pending,
            failed_jobs: Vec::new(),
            cancelled_jobs: Vec::new(),
            raw: raw.into(),
        }
    }

    /// Derive overall status from a raw checks payload.
    ///
    /// Any non-terminal job makes the result pending; otherwise any failure
    /// makes it a failure; otherwise success. Cancelled jobs are listed but
    /// do not by themselves fail the result.
    pub fn from_json(raw: &str) -> Self {
        let records = match parse_records(raw) {
            Some(records) if !records.is_empty() => records,
            _ => return Self::pending(raw),
        };

        let mut any_pending = false;
        let mut failed_jobs = Vec::new();
        let mut cancelled_jobs = Vec::new();
        for record in records {
            match JobState::parse(&record.state) {
                JobState::Passed => {}
                JobState::Failed => failed_jobs.push(record.name),
                JobState::Cancelled => cancelled_jobs.push(record.name),
                JobState::Pending => any_pending = true,
            }
        }

        if any_pending {
            return Self::pending(raw);
        }
        let status = if failed_jobs.is_empty() {
            CIStatus::Success
        } else {
            CIStatus::Failure
        };
        Self {
            status,
            failed_jobs,
            cancelled_jobs,
            raw: raw.to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != CIStatus::Pending
    }

    /// Drop jobs matching `pattern` from the failed and cancelled lists and
    /// return their names. A failure with nothing left becomes a success.
    pub fn ignore_matching(&mut self, pattern: &Regex) -> Vec<String> {
        let mut ignored = Vec::new();
        for list in [&mut self.failed_jobs, &mut self.cancelled_jobs] {
            list.retain(|job| {
                if pattern.is_match(job) {
                    ignored.push(job.clone());
                    false
                } else {
                    true
                }
            });
        }
        if self.status == CIStatus::Failure && self.failed_jobs.is_empty() {
            self.status = CIStatus::Success;
        }
        ignored
    }

    /// Terminal with no failed or cancelled jobs left.
    pub fn passed(&self) -> bool {
        self.is_terminal() && self.failed_jobs.is_empty() && self.cancelled_jobs.is_empty()
    }

    pub fn counts(&self) -> CiCounts {
        CiCounts::from_raw(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checks(jobs: &[(&str, &str)]) -> String {
        let records: Vec<serde_json::Value> = jobs
            .iter()
            .map(|(name, state)| serde_json::json!({"name": name, "state": state}))
            .collect();
        serde_json::to_string(&records).unwrap()
    }

    #[test]
    fn test_all_success() {
        let result = CIResult::from_json(&checks(&[("build", "SUCCESS"), ("lint", "SUCCESS")]));
        assert_eq!(result.status, CIStatus::Success);
        assert!(result.failed_jobs.is_empty());
        assert!(result.cancelled_jobs.is_empty());
        assert!(result.passed());
    }

    #[test]
    fn test_any_pending_overrides_failure() {
        for pending in ["PENDING", "QUEUED", "IN_PROGRESS", "", "WEIRD"] {
            let result = CIResult::from_json(&checks(&[
                ("build", "FAILURE"),
                ("lint", "SUCCESS"),
                ("test", pending),
            ]));
            assert_eq!(result.status, CIStatus::Pending, "state {pending:?}");
            assert!(result.failed_jobs.is_empty());
        }
    }

    #[test]
    fn test_single_failure_named() {
        let result = CIResult::from_json(&checks(&[
            ("build", "SUCCESS"),
            ("unit-tests", "FAILURE"),
            ("lint", "SUCCESS"),
        ]));
        assert_eq!(result.status, CIStatus::Failure);
        assert_eq!(result.failed_jobs, vec!["unit-tests"]);
    }

    #[test]
    fn test_skipped_and_neutral_pass_case_insensitively() {
        let result = CIResult::from_json(&checks(&[
            ("build", "success"),
            ("docs", "Skipped"),
            ("bench", "NEUTRAL"),
        ]));
        assert_eq!(result.status, CIStatus::Success);
    }

    #[test]
    fn test_cancelled_tracked_separately() {
        let result = CIResult::from_json(&checks(&[("build", "SUCCESS"), ("deploy", "CANCELLED")]));
        assert_eq!(result.status, CIStatus::Success);
        assert_eq!(result.cancelled_jobs, vec!["deploy"]);
        assert!(!result.passed());
    }

    #[test]
    fn test_malformed_or_empty_is_pending() {
        for raw in ["", "not json", "{}", "[]", "[{\"name\": 3}]"] {
            let result = CIResult::from_json(raw);
            assert_eq!(result.status, CIStatus::Pending, "input {raw:?}");
            assert!(result.failed_jobs.is_empty());
            assert!(result.cancelled_jobs.is_empty());
            assert_eq!(result.raw, raw);
        }
    }

    #[test]
    fn test_ignore_matching_can_turn_failure_into_pass() {
        let mut result = CIResult::from_json(&checks(&[
            ("build", "SUCCESS"),
            ("e2e-chrome", "FAILURE"),
            ("Integration Suite", "CANCELLED"),
        ]));
        assert_eq!(result.status, CIStatus::Failure);

        let pattern = Regex::new(crate::config::DEFAULT_CI_IGNORE_PATTERN).unwrap();
        let ignored = result.ignore_matching(&pattern);
        assert_eq!(ignored, vec!["e2e-chrome", "Integration Suite"]);
        assert_eq!(result.status, CIStatus::Success);
        assert!(result.passed());
    }

    #[test]
    fn test_counts() {
        let raw = checks(&[
            ("a", "SUCCESS"),
            ("b", "FAILURE"),
            ("c", "QUEUED"),
            ("d", "CANCELLED"),
            ("e", "SKIPPED"),
        ]);
        let counts = CiCounts::from_raw(&raw);
        assert_eq!(
            counts,
            CiCounts {
                passed: 2,
                failed: 1,
                pending: 1,
                cancelled: 1
            }
        );
        assert_eq!(counts.total(), 5);
    }

    #[test]
    fn test_job_detail_duration_requires_both_timestamps() {
        let raw = r#"[
            {"name": "build", "state": "CANCELLED",
             "startedAt": "2024-05-01T10:00:00Z", "completedAt": "2024-05-01T10:00:20Z"},
            {"name": "lint", "state": "CANCELLED", "startedAt": "2024-05-01T10:00:00Z"},
            {"name": "test", "state": "CANCELLED",
             "startedAt": "garbage", "completedAt": "2024-05-01T10:00:20Z"}
        ]"#;
        let details = CIJobDetail::parse_all(raw);
        assert_eq!(details.len(), 3);
        assert_eq!(details[0].duration, Some(Duration::from_secs(20)));
        assert_eq!(details[1].duration, None);
        assert_eq!(details[2].duration, None);
        assert!(details[2].completed_at.is_some());
    }
}
