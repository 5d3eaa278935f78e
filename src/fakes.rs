//! In-memory gateway implementations.
//!
//! Each fake records the calls it receives as short strings and can be told
//! to fail any call whose string starts with a given prefix.

use std::collections::{BTreeSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::assistant::{AssistantEvent, AssistantExecutor, AssistantRequest, AssistantResponse, ProgressFn};
use crate::errors::{AssistantError, ExecError, GatewayError};
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};
use crate::gates::{GateDecision, PlanApprover};
use crate::gateways::GatewayFactory;
use crate::review::{PullRequestRef, ReviewGateway};
use crate::vcs::{CommitInfo, CommitMode, Vcs};
use crate::workflow::{Plan, Workflow};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared call log with prefix-based failure injection.
#[derive(Default)]
struct CallLog {
    calls: Mutex<Vec<String>>,
    fail_prefixes: Mutex<Vec<String>>,
}

impl CallLog {
    fn record(&self, call: String) -> Result<(), GatewayError> {
        let fail = lock(&self.fail_prefixes)
            .iter()
            .any(|p| call.starts_with(p.as_str()));
        lock(&self.calls).push(call.clone());
        if fail {
            Err(GatewayError::CommandFailed {
                command: call,
                exit_code: 1,
                stderr: "injected failure".to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn fail_on(&self, prefix: &str) {
        lock(&self.fail_prefixes).push(prefix.to_string());
    }

    fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

// ---------------------------------------------------------------------------
// Command runner
// ---------------------------------------------------------------------------

enum Scripted {
    Output(CommandOutput),
    NotFound,
    Timeout,
}

/// [`CommandRunner`] that replays queued results in order. An empty queue
/// yields a successful run with no output.
#[derive(Default)]
pub struct ScriptedRunner {
    queue: Mutex<VecDeque<Scripted>>,
    specs: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, stdout: &str) {
        self.push_exit(0, stdout, "");
    }

    pub fn push_exit(&self, exit_code: i32, stdout: &str, stderr: &str) {
        lock(&self.queue).push_back(Scripted::Output(CommandOutput {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code,
        }));
    }

    pub fn push_not_found(&self) {
        lock(&self.queue).push_back(Scripted::NotFound);
    }

    pub fn push_timeout(&self) {
        lock(&self.queue).push_back(Scripted::Timeout);
    }

    /// Command lines run so far, e.g. `git push -u origin main`.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.specs).iter().map(CommandSpec::display).collect()
    }

    pub fn specs(&self) -> Vec<CommandSpec> {
        lock(&self.specs).clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
        lock(&self.specs).push(spec.clone());
        let next = lock(&self.queue).pop_front();
        match next {
            None => Ok(CommandOutput::default()),
            Some(Scripted::Output(output)) => Ok(output),
            Some(Scripted::NotFound) => Err(ExecError::NotFound {
                program: spec.program.clone(),
            }),
            Some(Scripted::Timeout) => Err(ExecError::TimedOut {
                program: spec.program.clone(),
                timeout: spec.timeout,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// VCS
// ---------------------------------------------------------------------------

/// [`Vcs`] over an in-memory branch set. Only mutating calls are logged.
pub struct FakeVcs {
    log: CallLog,
    current: Mutex<String>,
    head: Mutex<String>,
    branches: Mutex<BTreeSet<String>>,
    has_changes: Mutex<bool>,
    commits: Mutex<Vec<CommitInfo>>,
}

impl Default for FakeVcs {
    fn default() -> Self {
        Self {
            log: CallLog::default(),
            current: Mutex::new("main".to_string()),
            head: Mutex::new("0000000".to_string()),
            branches: Mutex::new(BTreeSet::from(["main".to_string()])),
            has_changes: Mutex::new(false),
            commits: Mutex::new(Vec::new()),
        }
    }
}

impl FakeVcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, prefix: &str) {
        self.log.fail_on(prefix);
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.calls()
    }

    pub fn set_has_changes(&self, value: bool) {
        *lock(&self.has_changes) = value;
    }

    pub fn add_branch(&self, name: &str) {
        lock(&self.branches).insert(name.to_string());
    }

    /// Commits returned by [`Vcs::log_between`].
    pub fn set_commits(&self, commits: Vec<CommitInfo>) {
        *lock(&self.commits) = commits;
    }

    /// SHA returned by [`Vcs::head_commit`].
    pub fn set_head(&self, sha: &str) {
        *lock(&self.head) = sha.to_string();
    }

    pub fn current(&self) -> String {
        lock(&self.current).clone()
    }
}

#[async_trait]
impl Vcs for FakeVcs {
    async fn current_branch(&self) -> Result<String, GatewayError> {
        Ok(self.current())
    }

    async fn head_commit(&self) -> Result<String, GatewayError> {
        Ok(lock(&self.head).clone())
    }

    async fn branch_exists(&self, name: &str) -> Result<bool, GatewayError> {
        Ok(lock(&self.branches).contains(name))
    }

    async fn create_branch(&self, name: &str, base: &str) -> Result<(), GatewayError> {
        self.log.record(format!("create_branch {} from {}", name, base))?;
        lock(&self.branches).insert(name.to_string());
        *lock(&self.current) = name.to_string();
        Ok(())
    }

    async fn checkout(&self, name: &str) -> Result<(), GatewayError> {
        self.log.record(format!("checkout {}", name))?;
        *lock(&self.current) = name.to_string();
        Ok(())
    }

    async fn push(&self, branch: &str) -> Result<(), GatewayError> {
        self.log.record(format!("push {}", branch))
    }

    async fn delete_local_branch(&self, name: &str) -> Result<(), GatewayError> {
        self.log.record(format!("delete_local_branch {}", name))?;
        lock(&self.branches).remove(name);
        Ok(())
    }

    async fn delete_remote_branch(&self, name: &str) -> Result<(), GatewayError> {
        self.log.record(format!("delete_remote_branch {}", name))
    }

    async fn cherry_pick(&self, commit: &str) -> Result<(), GatewayError> {
        self.log.record(format!("cherry_pick {}", commit))
    }

    async fn checkout_files(&self, branch: &str, paths: &[String]) -> Result<(), GatewayError> {
        self.log
            .record(format!("checkout_files {}: {}", branch, paths.join(" ")))
    }

    async fn commit(&self, message: &str, mode: CommitMode) -> Result<(), GatewayError> {
        let mode = match mode {
            CommitMode::All => "all",
            CommitMode::Staged => "staged",
            CommitMode::Empty => "empty",
        };
        self.log.record(format!("commit {}: {}", mode, message))?;
        *lock(&self.has_changes) = false;
        Ok(())
    }

    async fn has_changes(&self) -> Result<bool, GatewayError> {
        Ok(*lock(&self.has_changes))
    }

    async fn log_between(&self, _base: &str, _head: &str) -> Result<Vec<CommitInfo>, GatewayError> {
        Ok(lock(&self.commits).clone())
    }

    async fn add_worktree(
        &self,
        path: &Path,
        branch: &str,
        base: Option<&str>,
    ) -> Result<(), GatewayError> {
        let call = match base {
            Some(base) => format!("add_worktree {} {} from {}", path.display(), branch, base),
            None => format!("add_worktree {} {}", path.display(), branch),
        };
        self.log.record(call)?;
        lock(&self.branches).insert(branch.to_string());
        Ok(())
    }

    async fn remove_worktree(&self, path: &Path) -> Result<(), GatewayError> {
        self.log.record(format!("remove_worktree {}", path.display()))
    }
}

// ---------------------------------------------------------------------------
// Review
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPr {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

/// [`ReviewGateway`] that numbers new PRs from 100 upwards and serves queued
/// check payloads.
pub struct FakeReview {
    log: CallLog,
    next_number: AtomicU64,
    prs: Mutex<Vec<CreatedPr>>,
    checks: Mutex<VecDeque<Result<String, GatewayError>>>,
    default_checks: Mutex<String>,
    checks_calls: AtomicUsize,
}

impl Default for FakeReview {
    fn default() -> Self {
        Self {
            log: CallLog::default(),
            next_number: AtomicU64::new(100),
            prs: Mutex::new(Vec::new()),
            checks: Mutex::new(VecDeque::new()),
            default_checks: Mutex::new("[]".to_string()),
            checks_calls: AtomicUsize::new(0),
        }
    }
}

impl FakeReview {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, prefix: &str) {
        self.log.fail_on(prefix);
    }

    /// Mutating calls plus `find_pr` and `rerun_failed_runs`.
    pub fn calls(&self) -> Vec<String> {
        self.log.calls()
    }

    pub fn created_prs(&self) -> Vec<CreatedPr> {
        lock(&self.prs).clone()
    }

    /// Current body of a PR opened through this fake.
    pub fn body_of(&self, number: u64) -> Option<String> {
        lock(&self.prs)
            .iter()
            .find(|p| p.number == number)
            .map(|p| p.body.clone())
    }

    pub fn push_checks(&self, result: Result<String, GatewayError>) {
        lock(&self.checks).push_back(result);
    }

    /// Payload served once the queue is empty.
    pub fn set_default_checks(&self, raw: &str) {
        *lock(&self.default_checks) = raw.to_string();
    }

    pub fn checks_calls(&self) -> usize {
        self.checks_calls.load(Ordering::SeqCst)
    }

    fn url(number: u64) -> String {
        format!("https://github.com/acme/app/pull/{}", number)
    }
}

#[async_trait]
impl ReviewGateway for FakeReview {
    async fn create_pr(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<String, GatewayError> {
        self.log.record(format!("create_pr {} -> {}", head, base))?;
        let number = self.next_number.fetch_add(1, Ordering::SeqCst);
        lock(&self.prs).push(CreatedPr {
            number,
            title: title.to_string(),
            body: body.to_string(),
            head: head.to_string(),
            base: base.to_string(),
        });
        Ok(Self::url(number))
    }

    async fn edit_pr_body(&self, number: u64, body: &str) -> Result<(), GatewayError> {
        self.log.record(format!("edit_pr_body {}", number))?;
        if let Some(pr) = lock(&self.prs).iter_mut().find(|p| p.number == number) {
            pr.body = body.to_string();
        }
        Ok(())
    }

    async fn close_pr(&self, number: u64) -> Result<(), GatewayError> {
        self.log.record(format!("close_pr {}", number))
    }

    async fn find_pr(&self, branch: &str) -> Result<PullRequestRef, GatewayError> {
        self.log.record(format!("find_pr {}", branch))?;
        lock(&self.prs)
            .iter()
            .find(|p| p.head == branch)
            .map(|p| PullRequestRef {
                number: p.number,
                url: Self::url(p.number),
            })
            .ok_or_else(|| GatewayError::NoPullRequest {
                branch: branch.to_string(),
            })
    }

    async fn pr_checks(&self, _number: u64) -> Result<String, GatewayError> {
        self.checks_calls.fetch_add(1, Ordering::SeqCst);
        let next = lock(&self.checks).pop_front();
        match next {
            Some(result) => result,
            None => Ok(lock(&self.default_checks).clone()),
        }
    }

    async fn rerun_failed_runs(&self, branch: &str, commit: &str) -> Result<Vec<u64>, GatewayError> {
        self.log
            .record(format!("rerun_failed_runs {}@{}", branch, commit))?;
        Ok(vec![1])
    }
}

// ---------------------------------------------------------------------------
// Gateway factory
// ---------------------------------------------------------------------------

/// Hands out the same fakes for every directory, remembering which
/// directories were asked for.
#[derive(Default)]
pub struct FakeGateways {
    pub vcs: Arc<FakeVcs>,
    pub review: Arc<FakeReview>,
    dirs: Mutex<Vec<std::path::PathBuf>>,
}

impl FakeGateways {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dirs(&self) -> Vec<std::path::PathBuf> {
        lock(&self.dirs).clone()
    }
}

impl GatewayFactory for FakeGateways {
    fn vcs(&self, dir: &Path) -> Arc<dyn Vcs> {
        lock(&self.dirs).push(dir.to_path_buf());
        self.vcs.clone()
    }

    fn review(&self, dir: &Path) -> Arc<dyn ReviewGateway> {
        lock(&self.dirs).push(dir.to_path_buf());
        self.review.clone()
    }
}

// ---------------------------------------------------------------------------
// Assistant and approval
// ---------------------------------------------------------------------------

/// [`AssistantExecutor`] replaying queued replies. An empty queue answers
/// `"done"`.
#[derive(Default)]
pub struct ScriptedAssistant {
    replies: Mutex<VecDeque<Result<AssistantResponse, AssistantError>>>,
    requests: Mutex<Vec<AssistantRequest>>,
}

impl ScriptedAssistant {
    pub fn new() -> Self {
        Self::default()
    }

    fn reply(output: String, structured: Option<Value>) -> AssistantResponse {
        AssistantResponse {
            output,
            structured,
            exit_code: 0,
            duration: Duration::from_secs(1),
        }
    }

    pub fn push_output(&self, output: &str) {
        lock(&self.replies).push_back(Ok(Self::reply(output.to_string(), None)));
    }

    pub fn push_structured(&self, value: Value) {
        lock(&self.replies).push_back(Ok(Self::reply(value.to_string(), Some(value))));
    }

    pub fn push_error(&self, error: AssistantError) {
        lock(&self.replies).push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<AssistantRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl AssistantExecutor for ScriptedAssistant {
    async fn execute(
        &self,
        request: &AssistantRequest,
        on_progress: ProgressFn<'_>,
    ) -> Result<AssistantResponse, AssistantError> {
        lock(&self.requests).push(request.clone());
        on_progress(AssistantEvent::Thinking("working".to_string()));
        let next = lock(&self.replies).pop_front();
        next.unwrap_or_else(|| Ok(Self::reply("done".to_string(), None)))
    }
}

/// Returns the same decision for every plan.
pub struct StaticApprover(pub GateDecision);

impl PlanApprover for StaticApprover {
    fn review(&self, _workflow: &Workflow, _plan: &Plan) -> anyhow::Result<GateDecision> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_call_log_records_failed_calls() {
        let vcs = FakeVcs::new();
        vcs.fail_on("push feat");
        assert!(vcs.push("feat").await.is_err());
        assert!(vcs.push("main").await.is_ok());
        assert_eq!(vcs.calls(), vec!["push feat", "push main"]);
    }

    #[tokio::test]
    async fn test_find_pr_sees_created_prs() {
        let review = FakeReview::new();
        assert!(matches!(
            review.find_pr("feat").await,
            Err(GatewayError::NoPullRequest { .. })
        ));
        let url = review.create_pr("t", "b", "feat", "main").await.unwrap();
        assert!(url.ends_with("/pull/100"));
        assert_eq!(review.find_pr("feat").await.unwrap().number, 100);
    }
}
