//! Building and unwinding a stacked PR chain.
//!
//! All external calls run strictly in chain order; each branch must exist
//! before the next one is based on it.

use std::sync::Arc;

use crate::errors::{GatewayError, RollbackError, RollbackFailure, SplitError, SplitFailure};
use crate::review::{ReviewGateway, pr_number};
use crate::vcs::{CommitMode, Vcs};

use super::{
    PRInfo, PRSplitPlan, PRSplitResult, SplitStrategy, child_branch_name, parent_branch_name,
    parent_body_with_children,
};

pub struct SplitManager {
    vcs: Arc<dyn Vcs>,
    review: Arc<dyn ReviewGateway>,
}

/// Wrap a gateway failure with the step that produced it.
fn step(name: impl Into<String>) -> impl FnOnce(GatewayError) -> SplitError {
    let name = name.into();
    move |source| SplitError::Step { step: name, source }
}

impl SplitManager {
    pub fn new(vcs: Arc<dyn Vcs>, review: Arc<dyn ReviewGateway>) -> Self {
        Self { vcs, review }
    }

    /// Build the branch chain and open its pull requests.
    ///
    /// On failure the returned [`SplitFailure`] carries everything created so
    /// far. Nothing is rolled back automatically.
    pub async fn execute_split(
        &self,
        plan: &PRSplitPlan,
        source_branch: &str,
        main_branch: &str,
    ) -> Result<PRSplitResult, SplitFailure> {
        let mut result = PRSplitResult {
            source_branch: source_branch.to_string(),
            ..Default::default()
        };

        let validated = if source_branch.trim().is_empty() || main_branch.trim().is_empty() {
            Err(SplitError::InvalidInput(
                "source and main branch names are required".into(),
            ))
        } else {
            plan.validate()
        };
        if let Err(error) = validated {
            return Err(SplitFailure {
                partial: result,
                error,
            });
        }

        match self.build_chain(plan, source_branch, main_branch, &mut result).await {
            Ok(()) => {
                tracing::info!(
                    source = source_branch,
                    children = result.child_prs.len(),
                    "PR split complete"
                );
                Ok(result)
            }
            Err(error) => {
                tracing::warn!(
                    source = source_branch,
                    branches = result.branches.len(),
                    prs = result.pr_count(),
                    error = %error,
                    "PR split failed part-way"
                );
                Err(SplitFailure {
                    partial: result,
                    error,
                })
            }
        }
    }

    async fn build_chain(
        &self,
        plan: &PRSplitPlan,
        source: &str,
        main: &str,
        result: &mut PRSplitResult,
    ) -> Result<(), SplitError> {
        let vcs = &self.vcs;

        let parent = parent_branch_name(source);
        vcs.create_branch(&parent, main)
            .await
            .map_err(step(format!("create parent branch {}", parent)))?;
        result.branches.push(parent.clone());
        vcs.commit(&format!("split: {}", plan.parent_title), CommitMode::Empty)
            .await
            .map_err(step(format!("commit marker on {}", parent)))?;
        vcs.push(&parent)
            .await
            .map_err(step(format!("push {}", parent)))?;
        result.pushed_branches.push(parent.clone());

        let mut bases = Vec::with_capacity(plan.children.len());
        let mut previous = parent.clone();
        for (i, child) in plan.children.iter().enumerate() {
            let branch = child_branch_name(source, i + 1, &child.title);
            vcs.create_branch(&branch, &previous)
                .await
                .map_err(step(format!("create branch {}", branch)))?;
            result.branches.push(branch.clone());

            match plan.strategy {
                SplitStrategy::ByCommit => {
                    for commit in &child.commits {
                        vcs.cherry_pick(commit)
                            .await
                            .map_err(step(format!("cherry-pick {} onto {}", commit, branch)))?;
                    }
                }
                SplitStrategy::ByFile => {
                    vcs.checkout_files(source, &child.files)
                        .await
                        .map_err(step(format!("check out files from {} onto {}", source, branch)))?;
                    vcs.commit(&child.title, CommitMode::Staged)
                        .await
                        .map_err(step(format!("commit files on {}", branch)))?;
                }
            }

            vcs.push(&branch)
                .await
                .map_err(step(format!("push {}", branch)))?;
            result.pushed_branches.push(branch.clone());
            tracing::debug!(branch = %branch, base = %previous, "split branch ready");
            bases.push(previous);
            previous = branch;
        }

        let parent_pr = self
            .open_pr(&plan.parent_title, &plan.parent_description, &parent, main)
            .await?;
        result.parent_pr = Some(parent_pr.clone());

        for (i, child) in plan.children.iter().enumerate() {
            let branch = &result.branches[i + 1];
            let pr = self
                .open_pr(&child.title, &child.description, branch, &bases[i])
                .await?;
            result.child_prs.push(pr);
        }

        let body = parent_body_with_children(&plan.parent_description, &result.child_prs);
        self.review
            .edit_pr_body(parent_pr.number, &body)
            .await
            .map_err(step(format!("update parent PR #{}", parent_pr.number)))?;

        if let Err(e) = vcs.checkout(source).await {
            tracing::warn!(branch = source, error = %e, "could not return to source branch");
        }
        Ok(())
    }

    async fn open_pr(
        &self,
        title: &str,
        description: &str,
        head: &str,
        base: &str,
    ) -> Result<PRInfo, SplitError> {
        let label = format!("open PR {} -> {}", head, base);
        let url = self
            .review
            .create_pr(title, description, head, base)
            .await
            .map_err(step(label.clone()))?;
        let number = pr_number(&url).map_err(step(label))?;
        Ok(PRInfo {
            number,
            url,
            title: title.to_string(),
            description: description.to_string(),
        })
    }

    /// Best-effort undo of a (possibly partial) split.
    ///
    /// Closes child PRs newest first, then the parent PR, then deletes pushed
    /// remote branches newest first, then local branches newest first. Every step is
    /// attempted; failures are collected into one [`RollbackError`].
    pub async fn rollback(&self, result: &PRSplitResult) -> Result<(), RollbackError> {
        let mut failures = Vec::new();
        let mut attempt = |step: String, outcome: Result<(), GatewayError>| {
            if let Err(error) = outcome {
                tracing::warn!(step = %step, error = %error, "rollback step failed");
                failures.push(RollbackFailure { step, error });
            }
        };

        for pr in result.child_prs.iter().rev() {
            attempt(format!("close PR #{}", pr.number), self.review.close_pr(pr.number).await);
        }
        if let Some(parent) = &result.parent_pr {
            attempt(
                format!("close parent PR #{}", parent.number),
                self.review.close_pr(parent.number).await,
            );
        }

        for branch in result.pushed_branches.iter().rev() {
            attempt(
                format!("delete remote branch {}", branch),
                self.vcs.delete_remote_branch(branch).await,
            );
        }

        // A checked-out branch cannot be deleted.
        if !result.source_branch.is_empty() && !result.branches.is_empty() {
            attempt(
                format!("check out {}", result.source_branch),
                self.vcs.checkout(&result.source_branch).await,
            );
        }
        for branch in result.branches.iter().rev() {
            attempt(
                format!("delete local branch {}", branch),
                self.vcs.delete_local_branch(branch).await,
            );
        }

        if failures.is_empty() {
            tracing::info!(branches = result.branches.len(), "split rolled back");
            Ok(())
        } else {
            Err(RollbackError { failures })
        }
    }
}
