//! Code-review gateway.
//!
//! [`ReviewGateway`] covers pull requests and CI runs on the hosting service;
//! [`GhCli`] implements it with the GitHub `gh` CLI.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::GatewayError;
use crate::exec::{CommandOutput, CommandRunner, ExecContext};
use crate::util::pr_number_from_url;

/// An existing pull request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PullRequestRef {
    pub number: u64,
    pub url: String,
}

#[async_trait]
pub trait ReviewGateway: Send + Sync {
    /// Open a pull request and return its URL.
    async fn create_pr(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<String, GatewayError>;

    async fn edit_pr_body(&self, number: u64, body: &str) -> Result<(), GatewayError>;

    async fn close_pr(&self, number: u64) -> Result<(), GatewayError>;

    /// Pull request whose head is `branch`.
    ///
    /// Returns [`GatewayError::NoPullRequest`] when none exists.
    async fn find_pr(&self, branch: &str) -> Result<PullRequestRef, GatewayError>;

    /// Raw JSON array of check records for a pull request.
    async fn pr_checks(&self, number: u64) -> Result<String, GatewayError>;

    /// Re-run every failed or cancelled CI run for `commit` on `branch`.
    /// Returns the ids of the runs that were restarted.
    async fn rerun_failed_runs(&self, branch: &str, commit: &str) -> Result<Vec<u64>, GatewayError>;
}

/// Exit code `gh pr checks` uses when some checks are still pending.
const GH_CHECKS_PENDING_EXIT: i32 = 8;

/// Runs listed per commit when looking for ones to re-run.
const RUN_LIST_LIMIT: &str = "50";

#[derive(Debug, Deserialize)]
struct RunRecord {
    #[serde(rename = "databaseId")]
    database_id: u64,
    #[serde(default)]
    conclusion: String,
}

impl RunRecord {
    fn needs_rerun(&self) -> bool {
        matches!(
            self.conclusion.as_str(),
            "failure" | "cancelled" | "timed_out" | "startup_failure"
        )
    }
}

/// [`ReviewGateway`] over the `gh` executable.
#[derive(Clone)]
pub struct GhCli {
    runner: Arc<dyn CommandRunner>,
    ctx: ExecContext,
}

impl GhCli {
    pub fn new(runner: Arc<dyn CommandRunner>, ctx: ExecContext) -> Self {
        Self { runner, ctx }
    }

    async fn gh_unchecked(&self, args: &[&str]) -> Result<CommandOutput, GatewayError> {
        let spec = self.ctx.command("gh", args);
        Ok(self.runner.run(&spec).await?)
    }

    async fn gh(&self, args: &[&str]) -> Result<CommandOutput, GatewayError> {
        let output = self.gh_unchecked(args).await?;
        if !output.success() {
            return Err(failed(args, &output));
        }
        Ok(output)
    }
}

fn failed(args: &[&str], output: &CommandOutput) -> GatewayError {
    GatewayError::CommandFailed {
        command: format!("gh {}", args.first().copied().unwrap_or_default()),
        exit_code: output.exit_code,
        stderr: output.stderr.trim().to_string(),
    }
}

fn is_no_pr_message(stderr: &str) -> bool {
    stderr.to_lowercase().contains("no pull requests found")
}

fn is_no_checks_message(stderr: &str) -> bool {
    stderr.to_lowercase().contains("no checks reported")
}

#[async_trait]
impl ReviewGateway for GhCli {
    async fn create_pr(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<String, GatewayError> {
        if title.trim().is_empty() || head.trim().is_empty() || base.trim().is_empty() {
            return Err(GatewayError::InvalidInput(
                "pull request title, head and base are required".into(),
            ));
        }
        let output = self
            .gh(&[
                "pr", "create", "--title", title, "--body", body, "--head", head, "--base", base,
            ])
            .await?;
        let url = output
            .stdout
            .lines()
            .map(str::trim)
            .rfind(|line| line.starts_with("http"))
            .unwrap_or_else(|| output.stdout.trim())
            .to_string();
        tracing::info!(%url, head, base, "pull request created");
        Ok(url)
    }

    async fn edit_pr_body(&self, number: u64, body: &str) -> Result<(), GatewayError> {
        let number = number.to_string();
        self.gh(&["pr", "edit", &number, "--body", body]).await?;
        Ok(())
    }

    async fn close_pr(&self, number: u64) -> Result<(), GatewayError> {
        let number = number.to_string();
        self.gh(&["pr", "close", &number]).await?;
        Ok(())
    }

    async fn find_pr(&self, branch: &str) -> Result<PullRequestRef, GatewayError> {
        let args = ["pr", "view", branch, "--json", "number,url"];
        let output = self.gh_unchecked(&args).await?;
        if !output.success() {
            if is_no_pr_message(&output.stderr) {
                return Err(GatewayError::NoPullRequest {
                    branch: branch.to_string(),
                });
            }
            return Err(failed(&args, &output));
        }
        serde_json::from_str(output.stdout.trim()).map_err(|source| GatewayError::Parse {
            what: "gh pr view output",
            source,
        })
    }

    async fn pr_checks(&self, number: u64) -> Result<String, GatewayError> {
        let number = number.to_string();
        let mut args = vec!["pr", "checks"];
        // 0 selects the pull request of the checked-out branch.
        if number != "0" {
            args.push(number.as_str());
        }
        args.extend(["--json", "name,state,startedAt,completedAt"]);

        let output = self.gh_unchecked(&args).await?;
        match output.exit_code {
            0 | GH_CHECKS_PENDING_EXIT => Ok(output.stdout),
            _ if is_no_checks_message(&output.stderr) => Ok("[]".to_string()),
            _ if is_no_pr_message(&output.stderr) => Err(GatewayError::NoPullRequest {
                branch: if number == "0" {
                    "HEAD".to_string()
                } else {
                    format!("#{}", number)
                },
            }),
            _ => Err(failed(&args, &output)),
        }
    }

    async fn rerun_failed_runs(&self, branch: &str, commit: &str) -> Result<Vec<u64>, GatewayError> {
        if branch.trim().is_empty() || commit.trim().is_empty() {
            return Err(GatewayError::InvalidInput(
                "branch and commit are required to re-run CI".into(),
            ));
        }
        let output = self
            .gh(&[
                "run",
                "list",
                "--branch",
                branch,
                "--commit",
                commit,
                "--limit",
                RUN_LIST_LIMIT,
                "--json",
                "databaseId,conclusion",
            ])
            .await?;
        let runs: Vec<RunRecord> =
            serde_json::from_str(output.stdout.trim()).map_err(|source| GatewayError::Parse {
                what: "gh run list output",
                source,
            })?;

        let mut rerun = Vec::new();
        for run in runs.iter().filter(|r| r.needs_rerun()) {
            let id = run.database_id.to_string();
            // Cancelled runs are restarted whole.
            if run.conclusion == "cancelled" {
                self.gh(&["run", "rerun", &id]).await?;
            } else {
                self.gh(&["run", "rerun", &id, "--failed"]).await?;
            }
            rerun.push(run.database_id);
        }
        tracing::info!(branch, commit, runs = rerun.len(), "re-ran failed CI runs");
        Ok(rerun)
    }
}

/// Number of the pull request behind `url`, or an error naming the URL.
pub fn pr_number(url: &str) -> Result<u64, GatewayError> {
    pr_number_from_url(url).ok_or_else(|| {
        GatewayError::InvalidInput(format!("could not read a PR number from '{}'", url.trim()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedRunner;
    use std::time::Duration;

    fn gh_cli(runner: Arc<ScriptedRunner>) -> GhCli {
        GhCli::new(runner, ExecContext::new("/repo", Duration::from_secs(5)))
    }

    #[tokio::test]
    async fn test_create_pr_returns_url_line() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_ok("Creating pull request...\nhttps://github.com/o/r/pull/12\n");
        let gh = gh_cli(runner);
        let url = gh.create_pr("Title", "Body", "feature", "main").await.unwrap();
        assert_eq!(url, "https://github.com/o/r/pull/12");
        assert_eq!(pr_number(&url).unwrap(), 12);
    }

    #[tokio::test]
    async fn test_find_pr_no_pr_sentinel() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_exit(1, "", "no pull requests found for branch \"feature\"\n");
        let gh = gh_cli(runner);
        match gh.find_pr("feature").await.unwrap_err() {
            GatewayError::NoPullRequest { branch } => assert_eq!(branch, "feature"),
            other => panic!("Expected NoPullRequest, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_find_pr_parses_json() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_ok(r#"{"number": 5, "url": "https://github.com/o/r/pull/5"}"#);
        let gh = gh_cli(runner);
        let pr = gh.find_pr("feature").await.unwrap();
        assert_eq!(pr.number, 5);
    }

    #[tokio::test]
    async fn test_pr_checks_pending_exit_code_is_not_an_error() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_exit(8, r#"[{"name":"build","state":"PENDING"}]"#, "");
        let gh = gh_cli(runner);
        let raw = gh.pr_checks(3).await.unwrap();
        assert!(raw.contains("PENDING"));
    }

    #[tokio::test]
    async fn test_pr_checks_zero_targets_current_branch() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_ok("[]");
        let gh = gh_cli(runner.clone());
        gh.pr_checks(0).await.unwrap();
        assert_eq!(
            runner.calls(),
            vec!["gh pr checks --json name,state,startedAt,completedAt"]
        );
    }

    #[tokio::test]
    async fn test_pr_checks_without_checks_is_empty_list() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_exit(1, "", "no checks reported on the 'feature' branch");
        let gh = gh_cli(runner);
        assert_eq!(gh.pr_checks(3).await.unwrap(), "[]");
    }

    #[tokio::test]
    async fn test_rerun_targets_failed_and_cancelled_runs_on_head_commit() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_ok(
            r#"[{"databaseId": 11, "conclusion": "cancelled"},
                {"databaseId": 12, "conclusion": "success"},
                {"databaseId": 13, "conclusion": "failure"},
                {"databaseId": 14, "conclusion": ""}]"#,
        );
        let gh = gh_cli(runner.clone());
        assert_eq!(
            gh.rerun_failed_runs("feature", "9f2c1e0").await.unwrap(),
            vec![11, 13]
        );
        assert_eq!(
            runner.calls(),
            vec![
                "gh run list --branch feature --commit 9f2c1e0 --limit 50 --json databaseId,conclusion",
                "gh run rerun 11",
                "gh run rerun 13 --failed",
            ]
        );
    }

    #[tokio::test]
    async fn test_rerun_requires_commit() {
        let runner = Arc::new(ScriptedRunner::new());
        let gh = gh_cli(runner.clone());
        assert!(matches!(
            gh.rerun_failed_runs("feature", " ").await,
            Err(GatewayError::InvalidInput(_))
        ));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_pr_requires_head_and_base() {
        let runner = Arc::new(ScriptedRunner::new());
        let gh = gh_cli(runner.clone());
        assert!(matches!(
            gh.create_pr("T", "B", "", "main").await,
            Err(GatewayError::InvalidInput(_))
        ));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_pr_number_rejects_garbage() {
        assert!(pr_number("oops").is_err());
    }
}
