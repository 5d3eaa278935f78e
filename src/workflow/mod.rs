//! Workflow entity and phase state machine.
//!
//! A [`Workflow`] is the unit of resumability: it is persisted after every
//! transition and only mutated between phases.

pub mod plan;
pub mod state;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ci::CIFailureHistory;
use crate::errors::OrchestratorError;
use crate::split::PRSplitResult;

pub use plan::Plan;
pub use state::{StateManager, WorkflowLock};

/// Stage of the pipeline. `Completed` and `Failed` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Confirmation,
    Implementation,
    Refactoring,
    #[serde(rename = "pr_split")]
    PrSplit,
    Completed,
    Failed,
}

impl Phase {
    /// The non-terminal phases, in execution order.
    pub const PIPELINE: [Phase; 5] = [
        Phase::Planning,
        Phase::Confirmation,
        Phase::Implementation,
        Phase::Refactoring,
        Phase::PrSplit,
    ];

    pub fn next(self) -> Phase {
        match self {
            Phase::Planning => Phase::Confirmation,
            Phase::Confirmation => Phase::Implementation,
            Phase::Implementation => Phase::Refactoring,
            Phase::Refactoring => Phase::PrSplit,
            Phase::PrSplit => Phase::Completed,
            Phase::Completed => Phase::Completed,
            Phase::Failed => Phase::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }

    /// Artifacts that must exist before this phase may start.
    pub fn prerequisites(self) -> &'static [ArtifactType] {
        match self {
            Phase::Planning => &[],
            Phase::Confirmation => &[ArtifactType::Plan],
            Phase::Implementation => &[ArtifactType::Plan, ArtifactType::Approval],
            Phase::Refactoring => &[ArtifactType::Implementation],
            Phase::PrSplit => &[ArtifactType::Implementation, ArtifactType::Pr],
            Phase::Completed | Phase::Failed => &[],
        }
    }

    /// Artifact recorded when this phase completes.
    pub fn produces(self) -> Option<ArtifactType> {
        match self {
            Phase::Planning => Some(ArtifactType::Plan),
            Phase::Confirmation => Some(ArtifactType::Approval),
            Phase::Implementation => Some(ArtifactType::Implementation),
            Phase::Refactoring => Some(ArtifactType::Pr),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::Confirmation => "confirmation",
            Phase::Implementation => "implementation",
            Phase::Refactoring => "refactoring",
            Phase::PrSplit => "pr_split",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::InProgress => "in progress",
            PhaseStatus::Completed => "completed",
            PhaseStatus::Failed => "failed",
            PhaseStatus::Skipped => "skipped",
        };
        f.pad(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseState {
    pub status: PhaseStatus,
    /// Number of failed attempts so far.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Plan,
    Approval,
    Implementation,
    Pr,
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArtifactType::Plan => "plan",
            ArtifactType::Approval => "approval",
            ArtifactType::Implementation => "implementation",
            ArtifactType::Pr => "pr",
        };
        f.pad(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowType {
    #[default]
    Feature,
    Fix,
    Refactor,
    Chore,
    Docs,
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowType::Feature => "feature",
            WorkflowType::Fix => "fix",
            WorkflowType::Refactor => "refactor",
            WorkflowType::Chore => "chore",
            WorkflowType::Docs => "docs",
        };
        f.pad(s)
    }
}

/// The last failure of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowError {
    pub message: String,
    pub phase: Phase,
    pub recoverable: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    pub workflow_type: WorkflowType,
    pub description: String,
    pub current_phase: Phase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub phases: BTreeMap<Phase, PhaseState>,
    #[serde(default)]
    pub artifacts: BTreeSet<ArtifactType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WorkflowError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    #[serde(default)]
    pub split_enabled: bool,
    #[serde(default)]
    pub ci_history: CIFailureHistory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_result: Option<PRSplitResult>,
}

impl Workflow {
    pub fn new(
        name: impl Into<String>,
        workflow_type: WorkflowType,
        description: impl Into<String>,
        split_enabled: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            workflow_type,
            description: description.into(),
            current_phase: Phase::Planning,
            created_at: now,
            updated_at: now,
            phases: Phase::PIPELINE
                .iter()
                .map(|p| (*p, PhaseState::default()))
                .collect(),
            artifacts: BTreeSet::new(),
            error: None,
            worktree_path: None,
            branch: None,
            pr_number: None,
            pr_url: None,
            split_enabled,
            ci_history: CIFailureHistory::default(),
            split_result: None,
        }
    }

    pub fn phase_state(&self, phase: Phase) -> PhaseState {
        self.phases.get(&phase).cloned().unwrap_or_default()
    }

    fn phase_state_mut(&mut self, phase: Phase) -> &mut PhaseState {
        self.phases.entry(phase).or_default()
    }

    pub fn has_artifact(&self, artifact: ArtifactType) -> bool {
        self.artifacts.contains(&artifact)
    }

    /// Prerequisite artifacts of `phase` that have not been recorded yet.
    pub fn missing_prerequisites(&self, phase: Phase) -> Vec<ArtifactType> {
        phase
            .prerequisites()
            .iter()
            .copied()
            .filter(|a| !self.has_artifact(*a))
            .collect()
    }

    /// Refuse to enter `phase` unless every prerequisite artifact exists.
    pub fn check_prerequisites(&self, phase: Phase) -> Result<(), OrchestratorError> {
        let missing = self.missing_prerequisites(phase);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(OrchestratorError::MissingPrerequisites { phase, missing })
        }
    }

    pub fn mark_in_progress(&mut self, phase: Phase) {
        let now = Utc::now();
        let state = self.phase_state_mut(phase);
        state.status = PhaseStatus::InProgress;
        state.started_at = Some(now);
        state.completed_at = None;
        self.updated_at = now;
    }

    /// Record the phase's artifact and advance to the next phase.
    pub fn mark_completed(&mut self, phase: Phase) {
        let now = Utc::now();
        let state = self.phase_state_mut(phase);
        state.status = PhaseStatus::Completed;
        state.completed_at = Some(now);
        if let Some(artifact) = phase.produces() {
            self.artifacts.insert(artifact);
        }
        self.error = None;
        self.current_phase = phase.next();
        self.updated_at = now;
    }

    pub fn mark_skipped(&mut self, phase: Phase) {
        let now = Utc::now();
        let state = self.phase_state_mut(phase);
        state.status = PhaseStatus::Skipped;
        state.completed_at = Some(now);
        self.current_phase = phase.next();
        self.updated_at = now;
    }

    /// Record a phase failure. Unrecoverable failures move the workflow to
    /// [`Phase::Failed`]; recoverable ones leave it on `phase` for `resume`.
    pub fn mark_failed(&mut self, phase: Phase, message: impl Into<String>, recoverable: bool) {
        let now = Utc::now();
        let state = self.phase_state_mut(phase);
        state.status = PhaseStatus::Failed;
        state.attempts += 1;
        self.error = Some(WorkflowError {
            message: message.into(),
            phase,
            recoverable,
            occurred_at: now,
        });
        if !recoverable {
            self.current_phase = Phase::Failed;
        }
        self.updated_at = now;
    }

    pub fn is_finished(&self) -> bool {
        self.current_phase.is_terminal()
    }

    /// One-word status for listings.
    pub fn status_label(&self) -> &'static str {
        match self.current_phase {
            Phase::Completed => "completed",
            Phase::Failed => "failed",
            phase => match self.phase_state(phase).status {
                PhaseStatus::Failed => "needs resume",
                PhaseStatus::InProgress => "interrupted",
                _ => "active",
            },
        }
    }
}

/// Workflow names double as directory and branch names.
pub fn validate_name(name: &str) -> Result<(), OrchestratorError> {
    let invalid = |reason: &str| OrchestratorError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.is_empty() {
        return Err(invalid("name must not be empty"));
    }
    if name.len() > 64 {
        return Err(invalid("name must be at most 64 characters"));
    }
    if name.starts_with('.') || name.starts_with('-') {
        return Err(invalid("name must not start with '.' or '-'"));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(invalid(&format!("character '{}' is not allowed", c)));
    }
    if name.contains("..") || name.ends_with(".lock") {
        return Err(invalid("name is not a valid branch component"));
    }
    Ok(())
}
