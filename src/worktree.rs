//! Per-workflow working copies.
//!
//! With worktrees enabled every workflow gets `<state>/worktrees/<name>` on
//! its own branch, created the first time a phase needs it. Otherwise the
//! workflow branch is checked out in the main repository.

use std::path::PathBuf;

use crate::config::Config;
use crate::errors::GatewayError;
use crate::vcs::Vcs;
use crate::workflow::Workflow;

/// Make sure the workflow's branch (and worktree, when enabled) exists and
/// return the directory phases should run in. Records the branch and
/// worktree path on `workflow`.
pub async fn ensure_workspace(
    config: &Config,
    repo_vcs: &dyn Vcs,
    workflow: &mut Workflow,
) -> Result<PathBuf, GatewayError> {
    let branch = workflow
        .branch
        .clone()
        .unwrap_or_else(|| config.branch_for(&workflow.name));
    workflow.branch = Some(branch.clone());

    if !config.use_worktrees {
        if repo_vcs.current_branch().await? != branch {
            if repo_vcs.branch_exists(&branch).await? {
                repo_vcs.checkout(&branch).await?;
            } else {
                repo_vcs.create_branch(&branch, &config.main_branch).await?;
            }
        }
        return Ok(config.repo_dir.clone());
    }

    let path = workflow
        .worktree_path
        .clone()
        .unwrap_or_else(|| config.worktree_path_for(&workflow.name));
    if path.exists() {
        workflow.worktree_path = Some(path.clone());
        return Ok(path);
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| GatewayError::Io {
            program: "git".to_string(),
            source,
        })?;
    }
    let base = if repo_vcs.branch_exists(&branch).await? {
        None
    } else {
        Some(config.main_branch.as_str())
    };
    repo_vcs.add_worktree(&path, &branch, base).await?;
    tracing::info!(
        workflow = %workflow.name,
        branch = %branch,
        path = %path.display(),
        "created worktree"
    );
    workflow.worktree_path = Some(path.clone());
    Ok(path)
}

/// Remove the workflow's worktree if it has one.
pub async fn remove_workspace(repo_vcs: &dyn Vcs, workflow: &Workflow) -> Result<(), GatewayError> {
    match &workflow.worktree_path {
        Some(path) => repo_vcs.remove_worktree(path).await,
        None => Ok(()),
    }
}
