//! CI failure classification.
//!
//! Every `failure` job is code-related. Cancelled jobs are ambiguous and are
//! judged by how long they ran and what they are called:
//!
//! | Cancelled job                                   | Category       |
//! |-------------------------------------------------|----------------|
//! | no timing data                                  | Infrastructure |
//! | ran < 30s (superseded run, runner blip)         | Infrastructure |
//! | ran >= 5min (hang, timeout, resource exhaustion)| CodeRelated    |
//! | name mentions test/build/lint/check/e2e/integration | CodeRelated |
//! | anything else                                   | Infrastructure |
//!
//! A pattern that keeps recurring is `Persistent` no matter the mix.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{CIFailureHistory, CIJobDetail, CIResult};

const SHORT_CANCEL: Duration = Duration::from_secs(30);
const LONG_CANCEL: Duration = Duration::from_secs(5 * 60);
const CODE_KEYWORDS: &[&str] = &["test", "build", "lint", "check", "e2e", "integration"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CIFailureCategory {
    Infrastructure,
    CodeRelated,
    Mixed,
    Persistent,
}

impl CIFailureCategory {
    pub fn recommended_action(self) -> &'static str {
        match self {
            CIFailureCategory::Infrastructure => "auto-retry",
            CIFailureCategory::CodeRelated => "fix code",
            CIFailureCategory::Mixed => "fix code then retry",
            CIFailureCategory::Persistent => "stop and investigate manually",
        }
    }
}

impl fmt::Display for CIFailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CIFailureCategory::Infrastructure => "infrastructure",
            CIFailureCategory::CodeRelated => "code-related",
            CIFailureCategory::Mixed => "mixed",
            CIFailureCategory::Persistent => "persistent",
        };
        f.pad(s)
    }
}

/// Why one job was put in its category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CIFailureReason {
    pub job_name: String,
    pub category: CIFailureCategory,
    pub conclusion: String,
    pub duration: Option<Duration>,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedCIResult {
    pub result: CIResult,
    pub reasons: Vec<CIFailureReason>,
    /// `None` when nothing failed or was cancelled.
    pub category: Option<CIFailureCategory>,
    pub recommended_action: String,
}

impl ClassifiedCIResult {
    pub fn failing_jobs(&self) -> Vec<String> {
        self.reasons.iter().map(|r| r.job_name.clone()).collect()
    }

    /// Reasons of one category, e.g. to build a fix prompt for code failures only.
    pub fn reasons_in(&self, category: CIFailureCategory) -> impl Iterator<Item = &CIFailureReason> {
        self.reasons.iter().filter(move |r| r.category == category)
    }
}

/// Categorise a cancelled job from its name and run time.
pub fn classify_cancelled_job(
    name: &str,
    duration: Option<Duration>,
) -> (CIFailureCategory, String) {
    let Some(duration) = duration else {
        return (
            CIFailureCategory::Infrastructure,
            "cancelled without timing data".to_string(),
        );
    };
    if duration < SHORT_CANCEL {
        return (
            CIFailureCategory::Infrastructure,
            format!(
                "cancelled after {}s, likely a superseded run or runner issue",
                duration.as_secs()
            ),
        );
    }
    if duration >= LONG_CANCEL {
        return (
            CIFailureCategory::CodeRelated,
            format!(
                "cancelled after {}m, likely a hang or timeout",
                duration.as_secs() / 60
            ),
        );
    }
    let lower = name.to_lowercase();
    if let Some(keyword) = CODE_KEYWORDS.iter().find(|k| lower.contains(*k)) {
        return (
            CIFailureCategory::CodeRelated,
            format!("cancelled {} job", keyword),
        );
    }
    (
        CIFailureCategory::Infrastructure,
        "cancelled mid-run, likely concurrency or manual cancel".to_string(),
    )
}

#[derive(Debug, Clone, Copy)]
pub struct FailureClassifier {
    persistent_threshold: u32,
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self::new(3)
    }
}

impl FailureClassifier {
    pub fn new(persistent_threshold: u32) -> Self {
        Self {
            persistent_threshold,
        }
    }

    /// Classify `result`. `history` should already contain `result`'s own entry.
    pub fn classify(
        &self,
        result: &CIResult,
        history: Option<&CIFailureHistory>,
    ) -> ClassifiedCIResult {
        let details = CIJobDetail::parse_all(&result.raw);
        let detail_for = |name: &str| details.iter().find(|d| d.name == name);

        let mut reasons = Vec::new();
        for job in &result.failed_jobs {
            let detail = detail_for(job);
            reasons.push(CIFailureReason {
                job_name: job.clone(),
                category: CIFailureCategory::CodeRelated,
                conclusion: detail
                    .map(|d| d.conclusion.clone())
                    .unwrap_or_else(|| "FAILURE".to_string()),
                duration: detail.and_then(|d| d.duration),
                explanation: "job failed".to_string(),
            });
        }
        for job in &result.cancelled_jobs {
            let detail = detail_for(job);
            let duration = detail.and_then(|d| d.duration);
            let (category, explanation) = classify_cancelled_job(job, duration);
            reasons.push(CIFailureReason {
                job_name: job.clone(),
                category,
                conclusion: detail
                    .map(|d| d.conclusion.clone())
                    .unwrap_or_else(|| "CANCELLED".to_string()),
                duration,
                explanation,
            });
        }

        let category = self.overall_category(result, &reasons, history);
        tracing::debug!(
            failed = result.failed_jobs.len(),
            cancelled = result.cancelled_jobs.len(),
            category = ?category,
            "classified CI result"
        );
        ClassifiedCIResult {
            result: result.clone(),
            recommended_action: category
                .map(|c| c.recommended_action().to_string())
                .unwrap_or_else(|| "none".to_string()),
            reasons,
            category,
        }
    }

    fn overall_category(
        &self,
        result: &CIResult,
        reasons: &[CIFailureReason],
        history: Option<&CIFailureHistory>,
    ) -> Option<CIFailureCategory> {
        if reasons.is_empty() {
            return None;
        }
        if let Some(history) = history {
            let pattern = CIFailureHistory::pattern_of(result);
            if history.is_persistent(&pattern, self.persistent_threshold) {
                return Some(CIFailureCategory::Persistent);
            }
        }
        let code = reasons
            .iter()
            .any(|r| r.category == CIFailureCategory::CodeRelated);
        let infra = reasons
            .iter()
            .any(|r| r.category == CIFailureCategory::Infrastructure);
        Some(match (code, infra) {
            (true, true) => CIFailureCategory::Mixed,
            (true, false) => CIFailureCategory::CodeRelated,
            _ => CIFailureCategory::Infrastructure,
        })
    }
}
