//! CI quality gate run at the end of the Refactoring phase.
//!
//! Each round waits for CI, then acts on the classified failure:
//! infrastructure failures are re-run, code failures go back to the
//! assistant, persistent failures stop the workflow. Rounds that change
//! something are bounded by `ci.max_fix_attempts`. After such a round the
//! next wait starts with the initial delay, since an immediate check would
//! still see the previous run.

use std::path::Path;

use super::{Orchestrator, prompts};
use crate::ci::{CIFailureCategory, CiMonitor, CiProgress, FailureClassifier, WaitOptions};
use crate::errors::PhaseError;
use crate::workflow::Workflow;

impl Orchestrator {
    pub(super) async fn ci_gate(&self, workflow: &mut Workflow, dir: &Path) -> Result<(), PhaseError> {
        let settings = &self.config.ci;
        let pr = workflow.pr_number.unwrap_or(0);
        let branch = self.branch_of(workflow);
        let review = self.services.gateways.review(dir);
        let vcs = self.services.gateways.vcs(dir);
        let monitor = CiMonitor::new(review.clone(), self.services.clock.clone());
        let mut options = WaitOptions::from(settings);
        let classifier = FailureClassifier::new(settings.persistent_threshold);
        let observer = self.observer.clone();
        let on_progress = move |progress: &CiProgress| observer.ci_progress(progress);

        let mut fixes = 0;
        loop {
            let outcome = monitor
                .wait_for_ci_with_progress(pr, settings.timeout, &options, &on_progress)
                .await?;
            if !outcome.ignored_jobs.is_empty() {
                self.observer.message(&format!(
                    "Ignoring non-blocking job(s): {}",
                    outcome.ignored_jobs.join(", ")
                ));
            }

            if outcome.passed {
                workflow.ci_history.clear();
                self.state.save(workflow)?;
                tracing::info!(
                    workflow = %workflow.name,
                    pr,
                    checks = outcome.checks,
                    fixes,
                    "CI passed"
                );
                return Ok(());
            }

            let consecutive = workflow.ci_history.record(&outcome.result);
            let classified = classifier.classify(&outcome.result, Some(&workflow.ci_history));
            self.state.save(workflow)?;
            self.observer.ci_classified(&classified);

            let Some(category) = classified.category else {
                // Only cancelled jobs that were all filtered out.
                tracing::info!(workflow = %workflow.name, pr, "CI settled with nothing blocking");
                return Ok(());
            };
            tracing::warn!(
                workflow = %workflow.name,
                pr,
                category = %category,
                consecutive,
                failing = ?classified.failing_jobs(),
                "CI failed"
            );

            if category == CIFailureCategory::Persistent {
                return Err(PhaseError::CiGate {
                    category,
                    action: classified.recommended_action.clone(),
                    failed_jobs: classified.failing_jobs(),
                });
            }
            if fixes >= settings.max_fix_attempts {
                return Err(PhaseError::CiAttemptsExhausted { attempts: fixes });
            }
            fixes += 1;

            match category {
                CIFailureCategory::Infrastructure => {
                    let head = vcs.head_commit().await?;
                    let runs = review.rerun_failed_runs(&branch, &head).await?;
                    self.observer.message(&format!(
                        "Re-running {} CI run(s) after infrastructure failure",
                        runs.len()
                    ));
                }
                _ => {
                    self.ask(
                        workflow,
                        &format!("ci-fix-{}", fixes),
                        prompts::ci_fix(workflow, &classified, fixes),
                        None,
                        self.config.timeouts.refactoring,
                        dir,
                    )
                    .await?;
                    self.commit_and_push(
                        vcs.as_ref(),
                        workflow,
                        &format!("Fix CI failures ({})", classified.failing_jobs().join(", ")),
                    )
                    .await?;
                }
            }
            options.check_immediately = false;
        }
    }
}
