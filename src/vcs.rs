//! Version-control gateway.
//!
//! [`Vcs`] names the git verbs the workflow needs; [`GitCli`] implements them
//! by running `git` through a [`CommandRunner`] in a fixed directory.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;
use crate::exec::{CommandOutput, CommandRunner, ExecContext};

/// How [`Vcs::commit`] builds the commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Stage everything in the working tree, then commit.
    All,
    /// Commit only what is already staged.
    Staged,
    /// Commit with no changes (marker commit).
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub subject: String,
}

#[async_trait]
pub trait Vcs: Send + Sync {
    async fn current_branch(&self) -> Result<String, GatewayError>;
    /// Full SHA of the checked-out commit.
    async fn head_commit(&self) -> Result<String, GatewayError>;
    async fn branch_exists(&self, name: &str) -> Result<bool, GatewayError>;
    /// Create `name` from `base` and check it out.
    async fn create_branch(&self, name: &str, base: &str) -> Result<(), GatewayError>;
    async fn checkout(&self, name: &str) -> Result<(), GatewayError>;
    /// Push `branch` to `origin`, setting upstream.
    async fn push(&self, branch: &str) -> Result<(), GatewayError>;
    /// Force-delete a local branch.
    async fn delete_local_branch(&self, name: &str) -> Result<(), GatewayError>;
    async fn delete_remote_branch(&self, name: &str) -> Result<(), GatewayError>;
    async fn cherry_pick(&self, commit: &str) -> Result<(), GatewayError>;
    /// Check out `paths` as they exist on `branch`, staging them.
    async fn checkout_files(&self, branch: &str, paths: &[String]) -> Result<(), GatewayError>;
    async fn commit(&self, message: &str, mode: CommitMode) -> Result<(), GatewayError>;
    async fn has_changes(&self) -> Result<bool, GatewayError>;
    /// Commits reachable from `head` but not from `base`, oldest first.
    async fn log_between(&self, base: &str, head: &str) -> Result<Vec<CommitInfo>, GatewayError>;
    /// Add a worktree at `path` on `branch`, creating the branch from `base` when given.
    async fn add_worktree(
        &self,
        path: &Path,
        branch: &str,
        base: Option<&str>,
    ) -> Result<(), GatewayError>;
    async fn remove_worktree(&self, path: &Path) -> Result<(), GatewayError>;
}

fn require(value: &str, what: &str) -> Result<(), GatewayError> {
    if value.trim().is_empty() {
        return Err(GatewayError::InvalidInput(format!("{} must not be empty", what)));
    }
    Ok(())
}

/// [`Vcs`] over the `git` executable.
#[derive(Clone)]
pub struct GitCli {
    runner: Arc<dyn CommandRunner>,
    ctx: ExecContext,
}

impl GitCli {
    pub fn new(runner: Arc<dyn CommandRunner>, ctx: ExecContext) -> Self {
        Self { runner, ctx }
    }

    /// Run `git` and turn a non-zero exit into [`GatewayError::CommandFailed`].
    async fn git(&self, args: &[&str]) -> Result<CommandOutput, GatewayError> {
        let output = self.git_unchecked(args).await?;
        if !output.success() {
            return Err(GatewayError::CommandFailed {
                command: format!("git {}", args.join(" ")),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }

    async fn git_unchecked(&self, args: &[&str]) -> Result<CommandOutput, GatewayError> {
        let spec = self.ctx.command("git", args);
        Ok(self.runner.run(&spec).await?)
    }
}

#[async_trait]
impl Vcs for GitCli {
    async fn current_branch(&self) -> Result<String, GatewayError> {
        let output = self.git(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        Ok(output.stdout.trim().to_string())
    }

    async fn head_commit(&self) -> Result<String, GatewayError> {
        let output = self.git(&["rev-parse", "HEAD"]).await?;
        Ok(output.stdout.trim().to_string())
    }

    async fn branch_exists(&self, name: &str) -> Result<bool, GatewayError> {
        require(name, "branch name")?;
        let reference = format!("refs/heads/{}", name);
        let output = self
            .git_unchecked(&["rev-parse", "--verify", "--quiet", &reference])
            .await?;
        Ok(output.success())
    }

    async fn create_branch(&self, name: &str, base: &str) -> Result<(), GatewayError> {
        require(name, "branch name")?;
        require(base, "base branch")?;
        self.git(&["checkout", "-b", name, base]).await?;
        Ok(())
    }

    async fn checkout(&self, name: &str) -> Result<(), GatewayError> {
        require(name, "branch name")?;
        self.git(&["checkout", name]).await?;
        Ok(())
    }

    async fn push(&self, branch: &str) -> Result<(), GatewayError> {
        require(branch, "branch name")?;
        self.git(&["push", "-u", "origin", branch]).await?;
        Ok(())
    }

    async fn delete_local_branch(&self, name: &str) -> Result<(), GatewayError> {
        require(name, "branch name")?;
        self.git(&["branch", "-D", name]).await?;
        Ok(())
    }

    async fn delete_remote_branch(&self, name: &str) -> Result<(), GatewayError> {
        require(name, "branch name")?;
        self.git(&["push", "origin", "--delete", name]).await?;
        Ok(())
    }

    async fn cherry_pick(&self, commit: &str) -> Result<(), GatewayError> {
        require(commit, "commit")?;
        if let Err(e) = self.git(&["cherry-pick", commit]).await {
            // Leave the tree clean for whoever runs next.
            let _ = self.git_unchecked(&["cherry-pick", "--abort"]).await;
            return Err(e);
        }
        Ok(())
    }

    async fn checkout_files(&self, branch: &str, paths: &[String]) -> Result<(), GatewayError> {
        require(branch, "source branch")?;
        if paths.is_empty() {
            return Err(GatewayError::InvalidInput("no files to check out".into()));
        }
        let mut args = vec!["checkout", branch, "--"];
        args.extend(paths.iter().map(String::as_str));
        self.git(&args).await?;
        Ok(())
    }

    async fn commit(&self, message: &str, mode: CommitMode) -> Result<(), GatewayError> {
        require(message, "commit message")?;
        match mode {
            CommitMode::All => {
                self.git(&["add", "-A"]).await?;
                self.git(&["commit", "-m", message]).await?;
            }
            CommitMode::Staged => {
                self.git(&["commit", "-m", message]).await?;
            }
            CommitMode::Empty => {
                self.git(&["commit", "--allow-empty", "-m", message]).await?;
            }
        }
        Ok(())
    }

    async fn has_changes(&self) -> Result<bool, GatewayError> {
        let output = self.git(&["status", "--porcelain"]).await?;
        Ok(!output.stdout.trim().is_empty())
    }

    async fn log_between(&self, base: &str, head: &str) -> Result<Vec<CommitInfo>, GatewayError> {
        require(base, "base ref")?;
        require(head, "head ref")?;
        let range = format!("{}..{}", base, head);
        let output = self
            .git(&["log", "--reverse", "--format=%H%x09%s", &range])
            .await?;
        Ok(parse_log(&output.stdout))
    }

    async fn add_worktree(
        &self,
        path: &Path,
        branch: &str,
        base: Option<&str>,
    ) -> Result<(), GatewayError> {
        require(branch, "branch name")?;
        let path = path.to_string_lossy();
        match base {
            Some(base) => self.git(&["worktree", "add", "-b", branch, &path, base]).await?,
            None => self.git(&["worktree", "add", &path, branch]).await?,
        };
        Ok(())
    }

    async fn remove_worktree(&self, path: &Path) -> Result<(), GatewayError> {
        let path = path.to_string_lossy();
        self.git(&["worktree", "remove", "--force", &path]).await?;
        Ok(())
    }
}

fn parse_log(stdout: &str) -> Vec<CommitInfo> {
    stdout
        .lines()
        .filter_map(|line| {
            let (sha, subject) = line.split_once('\t')?;
            Some(CommitInfo {
                sha: sha.trim().to_string(),
                subject: subject.trim().to_string(),
            })
        })
        .collect()
}
