//! Phase state machine.
//!
//! The orchestrator owns a [`Workflow`] while it runs: it takes the workflow
//! lock, checks prerequisites before every phase, runs the phase body and
//! persists state after every transition. Phase bodies talk to the outside
//! world only through the injected [`Services`].

pub mod prompts;
mod quality_gate;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::assistant::{AssistantEvent, AssistantExecutor, AssistantRequest, AssistantResponse};
use crate::ci::{CiProgress, ClassifiedCIResult};
use crate::clock::Clock;
use crate::config::Config;
use crate::errors::{GatewayError, OrchestratorError, PhaseError};
use crate::gates::{GateDecision, PlanApprover};
use crate::gateways::GatewayFactory;
use crate::review::{PullRequestRef, pr_number};
use crate::split::{PRSplitPlan, PRSplitResult, SplitManager};
use crate::vcs::{CommitMode, Vcs};
use crate::workflow::{
    Phase, PhaseStatus, Plan, StateManager, Workflow, WorkflowType, validate_name,
};
use crate::worktree;

/// External collaborators used by phase bodies.
pub struct Services {
    pub gateways: Arc<dyn GatewayFactory>,
    pub assistant: Arc<dyn AssistantExecutor>,
    pub approver: Arc<dyn PlanApprover>,
    pub clock: Arc<dyn Clock>,
}

/// Receives progress while a workflow runs. Every method defaults to a no-op.
pub trait WorkflowObserver: Send + Sync {
    fn phase_started(&self, _workflow: &Workflow, _phase: Phase) {}
    fn phase_finished(&self, _workflow: &Workflow, _phase: Phase, _status: PhaseStatus) {}
    fn phase_failed(&self, _workflow: &Workflow, _phase: Phase, _error: &PhaseError) {}
    fn plan_ready(&self, _plan: &Plan) {}
    fn assistant_event(&self, _event: &AssistantEvent) {}
    fn ci_progress(&self, _progress: &CiProgress) {}
    fn ci_classified(&self, _classified: &ClassifiedCIResult) {}
    fn split_created(&self, _result: &PRSplitResult) {}
    fn message(&self, _text: &str) {}
}

pub struct NoopObserver;

impl WorkflowObserver for NoopObserver {}

pub struct Orchestrator {
    config: Config,
    state: StateManager,
    services: Services,
    observer: Arc<dyn WorkflowObserver>,
}

impl Orchestrator {
    pub fn new(config: Config, services: Services) -> Self {
        let state = StateManager::new(config.workflows_dir.clone());
        Self {
            config,
            state,
            services,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn WorkflowObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    /// Create a workflow and run it from Planning.
    pub async fn start(
        &self,
        name: &str,
        description: &str,
        workflow_type: WorkflowType,
    ) -> Result<Workflow, OrchestratorError> {
        validate_name(name)?;
        let _lock = self.state.lock(name)?;
        if self.state.exists(name) {
            return Err(OrchestratorError::AlreadyExists {
                name: name.to_string(),
            });
        }

        let mut workflow =
            Workflow::new(name, workflow_type, description, self.config.split_enabled);
        self.state.save(&workflow)?;
        tracing::info!(workflow = name, kind = %workflow_type, "workflow started");

        self.run(&mut workflow).await?;
        Ok(workflow)
    }

    /// Continue a workflow from its current phase. `split` overrides the
    /// workflow's PR-split flag when given.
    pub async fn resume(
        &self,
        name: &str,
        split: Option<bool>,
    ) -> Result<Workflow, OrchestratorError> {
        let _lock = self.state.lock(name)?;
        let mut workflow = self.state.load(name)?;
        if workflow.is_finished() {
            return Err(OrchestratorError::Terminal {
                name: name.to_string(),
                phase: workflow.current_phase,
            });
        }
        if let Some(split) = split {
            workflow.split_enabled = split;
        }
        tracing::info!(
            workflow = name,
            phase = %workflow.current_phase,
            "resuming workflow"
        );

        self.run(&mut workflow).await?;
        Ok(workflow)
    }

    /// Read-only snapshot.
    pub fn status(&self, name: &str) -> Result<Workflow, OrchestratorError> {
        self.state.load(name)
    }

    pub fn list(&self) -> Result<Vec<Workflow>, OrchestratorError> {
        Ok(self.state.list()?)
    }

    /// Remove persisted state and the worktree. A worktree that cannot be
    /// removed is reported and left behind, and so is the worktree of a
    /// workflow whose state cannot be read. The state is deleted regardless.
    pub async fn delete(&self, name: &str) -> Result<(), OrchestratorError> {
        validate_name(name)?;
        if !self.state.exists(name) {
            return Err(OrchestratorError::NotFound {
                name: name.to_string(),
            });
        }
        let lock = self.state.lock(name)?;

        match self.state.load(name) {
            Ok(workflow) => {
                let repo_vcs = self.services.gateways.vcs(&self.config.repo_dir);
                if let Err(e) = worktree::remove_workspace(repo_vcs.as_ref(), &workflow).await {
                    tracing::warn!(workflow = name, error = %e, "failed to remove worktree");
                    self.observer
                        .message(&format!("Could not remove worktree: {}", e));
                }
            }
            Err(e) => {
                tracing::warn!(workflow = name, error = %e, "unreadable state, leaving any worktree in place");
                self.observer.message(&format!(
                    "Could not read workflow state ({}); any worktree is left in place",
                    e
                ));
            }
        }

        drop(lock);
        self.state.delete(name)?;
        tracing::info!(workflow = name, "workflow deleted");
        Ok(())
    }

    /// Delete completed workflows, and failed ones too with `include_failed`.
    /// Returns the names removed.
    pub async fn clean(&self, include_failed: bool) -> Result<Vec<String>, OrchestratorError> {
        let mut removed = Vec::new();
        for workflow in self.state.list()? {
            let eligible = match workflow.current_phase {
                Phase::Completed => true,
                Phase::Failed => include_failed,
                _ => false,
            };
            if !eligible {
                continue;
            }
            match self.delete(&workflow.name).await {
                Ok(()) => removed.push(workflow.name),
                Err(OrchestratorError::InUse { name }) => {
                    tracing::warn!(workflow = %name, "skipping workflow in use");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }

    /// Drive phases until the workflow finishes or a phase fails.
    async fn run(&self, workflow: &mut Workflow) -> Result<(), OrchestratorError> {
        while !workflow.is_finished() {
            let phase = workflow.current_phase;

            if phase == Phase::PrSplit && !workflow.split_enabled {
                workflow.mark_skipped(phase);
                self.state.save(workflow)?;
                self.observer
                    .phase_finished(workflow, phase, PhaseStatus::Skipped);
                continue;
            }

            workflow.check_prerequisites(phase)?;
            workflow.mark_in_progress(phase);
            self.state.save(workflow)?;
            self.observer.phase_started(workflow, phase);
            tracing::info!(
                workflow = %workflow.name,
                phase = %phase,
                attempt = workflow.phase_state(phase).attempts + 1,
                "phase started"
            );

            match self.execute_phase(workflow, phase).await {
                Ok(()) => {
                    workflow.mark_completed(phase);
                    self.state.save(workflow)?;
                    self.observer
                        .phase_finished(workflow, phase, PhaseStatus::Completed);
                    tracing::info!(workflow = %workflow.name, phase = %phase, "phase completed");
                }
                Err(error) => {
                    let recoverable = error.is_recoverable();
                    let message = error.to_string();
                    workflow.mark_failed(phase, message.clone(), recoverable);
                    self.state.save(workflow)?;
                    self.observer.phase_failed(workflow, phase, &error);
                    tracing::warn!(
                        workflow = %workflow.name,
                        phase = %phase,
                        recoverable,
                        error = %message,
                        "phase failed"
                    );
                    return Err(OrchestratorError::PhaseFailed {
                        phase,
                        message,
                        recoverable,
                    });
                }
            }
        }
        Ok(())
    }

    async fn execute_phase(&self, workflow: &mut Workflow, phase: Phase) -> Result<(), PhaseError> {
        match phase {
            Phase::Planning => self.run_planning(workflow).await,
            Phase::Confirmation => self.run_confirmation(workflow),
            Phase::Implementation => self.run_implementation(workflow).await,
            Phase::Refactoring => self.run_refactoring(workflow).await,
            Phase::PrSplit => self.run_split(workflow).await,
            Phase::Completed | Phase::Failed => Ok(()),
        }
    }

    async fn run_planning(&self, workflow: &mut Workflow) -> Result<(), PhaseError> {
        let response = self
            .ask(
                workflow,
                "planning",
                prompts::planning(workflow),
                Some(Plan::schema()),
                self.config.timeouts.planning,
                &self.config.repo_dir,
            )
            .await?;
        let value = response
            .structured
            .ok_or_else(|| PhaseError::InvalidPlan("assistant returned no JSON plan".into()))?;
        let plan = Plan::from_value(value).map_err(|e| PhaseError::InvalidPlan(format!("{:#}", e)))?;
        self.state.save_plan(&workflow.name, &plan)?;
        self.observer.message(&format!(
            "Plan saved: {} phase(s), ~{} lines ({})",
            plan.phases.len(),
            plan.estimated_lines(),
            plan.complexity
        ));
        Ok(())
    }

    fn run_confirmation(&self, workflow: &mut Workflow) -> Result<(), PhaseError> {
        let plan = self.load_plan(workflow)?;
        self.observer.plan_ready(&plan);
        match self.services.approver.review(workflow, &plan)? {
            GateDecision::Approved => Ok(()),
            GateDecision::Rejected => Err(PhaseError::PlanRejected),
            GateDecision::Aborted => Err(PhaseError::Aborted),
        }
    }

    async fn run_implementation(&self, workflow: &mut Workflow) -> Result<(), PhaseError> {
        let dir = self.workspace(workflow).await?;
        let plan = self.load_plan(workflow)?;
        self.ask(
            workflow,
            "implementation",
            prompts::implementation(workflow, &plan),
            None,
            self.config.timeouts.implementation,
            &dir,
        )
        .await?;

        let vcs = self.services.gateways.vcs(&dir);
        self.commit_and_push(vcs.as_ref(), workflow, &format!("Implement {}", workflow.name))
            .await?;
        Ok(())
    }

    async fn run_refactoring(&self, workflow: &mut Workflow) -> Result<(), PhaseError> {
        let dir = self.workspace(workflow).await?;
        let plan = self.load_plan(workflow)?;
        self.ask(
            workflow,
            "refactoring",
            prompts::refactoring(workflow, &plan),
            None,
            self.config.timeouts.refactoring,
            &dir,
        )
        .await?;

        let vcs = self.services.gateways.vcs(&dir);
        self.commit_and_push(vcs.as_ref(), workflow, &format!("Refactor {}", workflow.name))
            .await?;

        let pr = self.ensure_pull_request(workflow, &dir, &plan).await?;
        workflow.pr_number = Some(pr.number);
        workflow.pr_url = Some(pr.url.clone());
        self.state.save(workflow)?;
        self.observer.message(&format!("Pull request: {}", pr.url));

        if self.config.ci.enabled {
            self.ci_gate(workflow, &dir).await?;
        } else {
            tracing::info!(workflow = %workflow.name, "CI gate disabled");
        }
        Ok(())
    }

    async fn run_split(&self, workflow: &mut Workflow) -> Result<(), PhaseError> {
        let dir = self.workspace(workflow).await?;
        let branch = self.branch_of(workflow);
        let main = self.config.main_branch.clone();
        let vcs = self.services.gateways.vcs(&dir);
        let review = self.services.gateways.review(&dir);

        let commits = vcs.log_between(&main, &branch).await?;
        if commits.is_empty() {
            self.observer
                .message(&format!("No commits between {} and {}; nothing to split", main, branch));
            return Ok(());
        }

        let response = self
            .ask(
                workflow,
                "split",
                prompts::split(workflow, &commits),
                Some(PRSplitPlan::schema()),
                self.config.timeouts.split,
                &dir,
            )
            .await?;
        let value = response
            .structured
            .ok_or_else(|| PhaseError::InvalidPlan("assistant returned no split plan".into()))?;
        let plan: PRSplitPlan = serde_json::from_value(value)
            .map_err(|e| PhaseError::InvalidPlan(format!("split plan does not match schema: {}", e)))?;

        let manager = SplitManager::new(vcs, review);
        match manager.execute_split(&plan, &branch, &main).await {
            Ok(result) => {
                self.observer.split_created(&result);
                workflow.split_result = Some(result);
                Ok(())
            }
            Err(failure) => {
                self.observer.message(&format!(
                    "Split failed ({}); rolling back {} branch(es)",
                    failure.error,
                    failure.partial.branches.len()
                ));
                let rollback = manager.rollback(&failure.partial).await.err();
                Err(PhaseError::Split {
                    source: failure.error,
                    rollback,
                })
            }
        }
    }

    /// Working directory for the workflow, creating its branch or worktree
    /// on first use.
    async fn workspace(&self, workflow: &mut Workflow) -> Result<PathBuf, PhaseError> {
        let repo_vcs = self.services.gateways.vcs(&self.config.repo_dir);
        let dir = worktree::ensure_workspace(&self.config, repo_vcs.as_ref(), workflow).await?;
        self.state.save(workflow)?;
        Ok(dir)
    }

    fn branch_of(&self, workflow: &Workflow) -> String {
        workflow
            .branch
            .clone()
            .unwrap_or_else(|| self.config.branch_for(&workflow.name))
    }

    fn load_plan(&self, workflow: &Workflow) -> Result<Plan, PhaseError> {
        self.state
            .load_plan(&workflow.name)?
            .ok_or_else(|| PhaseError::InvalidPlan("plan.json is missing".into()))
    }

    async fn commit_and_push(
        &self,
        vcs: &dyn Vcs,
        workflow: &Workflow,
        message: &str,
    ) -> Result<(), GatewayError> {
        let branch = self.branch_of(workflow);
        if vcs.has_changes().await? {
            vcs.commit(message, CommitMode::All).await?;
        }
        vcs.push(&branch).await
    }

    /// The PR for the workflow branch, opened if none exists yet.
    async fn ensure_pull_request(
        &self,
        workflow: &Workflow,
        dir: &Path,
        plan: &Plan,
    ) -> Result<PullRequestRef, PhaseError> {
        let branch = self.branch_of(workflow);
        let review = self.services.gateways.review(dir);
        match review.find_pr(&branch).await {
            Ok(pr) => Ok(pr),
            Err(GatewayError::NoPullRequest { .. }) => {
                let url = review
                    .create_pr(
                        &prompts::pr_title(workflow),
                        &prompts::pr_body(workflow, Some(plan)),
                        &branch,
                        &self.config.main_branch,
                    )
                    .await?;
                let number = pr_number(&url)?;
                tracing::info!(workflow = %workflow.name, pr = number, "opened pull request");
                Ok(PullRequestRef { number, url })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Run the assistant once, logging prompt and output under the workflow.
    async fn ask(
        &self,
        workflow: &Workflow,
        label: &str,
        prompt: String,
        schema: Option<Value>,
        timeout: Duration,
        dir: &Path,
    ) -> Result<AssistantResponse, PhaseError> {
        let attempt = workflow.phase_state(workflow.current_phase).attempts + 1;
        let stem = format!("{}-{}", label, attempt);
        self.state
            .write_log(&workflow.name, &format!("{}-prompt.md", stem), &prompt)?;

        let request = AssistantRequest {
            prompt,
            schema,
            timeout,
            working_dir: dir.to_path_buf(),
        };
        let observer = self.observer.clone();
        let on_event = move |event: AssistantEvent| observer.assistant_event(&event);
        let result = self.services.assistant.execute(&request, &on_event).await;

        let log = match &result {
            Ok(response) => response.output.clone(),
            Err(e) => format!("error: {}", e),
        };
        self.state
            .write_log(&workflow.name, &format!("{}-output.log", stem), &log)?;
        Ok(result?)
    }
}
