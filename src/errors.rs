//! Typed error hierarchy for Shipwright.
//!
//! One enum per subsystem:
//! - `ExecError`: spawning and waiting on external programs
//! - `GatewayError`: VCS and review verbs built on top of `exec`
//! - `AssistantError`: coding assistant invocations
//! - `CiError`: CI status checks and waits
//! - `SplitError` / `SplitFailure` / `RollbackError`: stacked PR splitting
//! - `PhaseError`: a single phase body, carries recoverability
//! - `OrchestratorError`: workflow lifecycle (start/resume/delete)

use std::time::Duration;

use thiserror::Error;

use crate::ci::CIFailureCategory;
use crate::split::PRSplitResult;
use crate::workflow::{ArtifactType, Phase};

/// Errors from running an external program.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("`{program}` not found on PATH")]
    NotFound { program: String },

    #[error("`{program}` timed out after {timeout:?}")]
    TimedOut { program: String, timeout: Duration },

    #[error("failed to run `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from VCS and review gateway verbs.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("required tool `{program}` is not installed")]
    ToolMissing { program: String },

    #[error("`{program}` timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    /// No pull request exists for the branch. Callers usually react by creating one.
    #[error("no pull request found for branch '{branch}'")]
    NoPullRequest { branch: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("`{command}` failed with exit code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("failed to parse {what}: {source}")]
    Parse {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to run `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl GatewayError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::Timeout { .. })
    }

    pub fn is_tool_missing(&self) -> bool {
        matches!(self, GatewayError::ToolMissing { .. })
    }
}

impl From<ExecError> for GatewayError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::NotFound { program } => GatewayError::ToolMissing { program },
            ExecError::TimedOut { program, timeout } => GatewayError::Timeout { program, timeout },
            ExecError::Io { program, source } => GatewayError::Io { program, source },
        }
    }
}

/// Errors from the coding assistant executor.
#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("assistant command `{program}` is not installed")]
    ToolMissing { program: String },

    #[error("assistant timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("assistant exited with code {exit_code}: {message}")]
    Failed { exit_code: i32, message: String },

    #[error("assistant output did not contain the expected structured result: {0}")]
    InvalidOutput(String),

    #[error("failed to run assistant: {0}")]
    Io(#[source] std::io::Error),
}

impl From<ExecError> for AssistantError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::NotFound { program } => AssistantError::ToolMissing { program },
            ExecError::TimedOut { timeout, .. } => AssistantError::Timeout { timeout },
            ExecError::Io { source, .. } => AssistantError::Io(source),
        }
    }
}

/// Errors from the CI engine.
#[derive(Debug, Error)]
pub enum CiError {
    #[error("CI status check timed out {attempts} time(s) in a row")]
    TimeoutExhausted { attempts: u32 },

    #[error("required tool `{program}` is not installed")]
    ToolMissing { program: String },

    #[error("no pull request found for the current branch")]
    NoPullRequest,

    #[error("CI did not reach a terminal state within {timeout:?} ({pending} job(s) still pending)")]
    WaitTimeout { timeout: Duration, pending: usize },

    #[error("CI status check failed: {0}")]
    Command(#[source] GatewayError),
}

impl CiError {
    /// Fatal errors abort a wait immediately instead of being retried on the next poll.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CiError::ToolMissing { .. } | CiError::NoPullRequest)
    }
}

/// Errors from building a stacked PR chain.
#[derive(Debug, Error)]
pub enum SplitError {
    #[error("invalid split plan: {0}")]
    InvalidPlan(String),

    #[error("invalid split input: {0}")]
    InvalidInput(String),

    #[error("split step '{step}' failed: {source}")]
    Step {
        step: String,
        #[source]
        source: GatewayError,
    },
}

/// A failed split together with everything it managed to create.
///
/// The manager never rolls back on its own; pass `partial` to
/// `SplitManager::rollback` to unwind it.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct SplitFailure {
    pub partial: PRSplitResult,
    #[source]
    pub error: SplitError,
}

/// One failed step of a rollback.
#[derive(Debug)]
pub struct RollbackFailure {
    pub step: String,
    pub error: GatewayError,
}

/// Every step that failed during a best-effort rollback.
#[derive(Debug, Error)]
#[error("rollback finished with {} failure(s): {}", .failures.len(), describe_failures(.failures))]
pub struct RollbackError {
    pub failures: Vec<RollbackFailure>,
}

fn describe_failures(failures: &[RollbackFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.step, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors from a single phase body.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error(transparent)]
    Assistant(#[from] AssistantError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Ci(#[from] CiError),

    #[error("CI failed ({category}): {action}. Failing jobs: {}", .failed_jobs.join(", "))]
    CiGate {
        category: CIFailureCategory,
        action: String,
        failed_jobs: Vec<String>,
    },

    #[error("CI still failing after {attempts} fix attempt(s)")]
    CiAttemptsExhausted { attempts: u32 },

    #[error("PR split failed: {source}{}", rollback_suffix(.rollback))]
    Split {
        #[source]
        source: SplitError,
        rollback: Option<RollbackError>,
    },

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("plan was rejected")]
    PlanRejected,

    #[error("aborted by operator")]
    Aborted,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn rollback_suffix(rollback: &Option<RollbackError>) -> String {
    match rollback {
        Some(err) => format!(" (rollback incomplete: {})", err),
        None => " (rolled back)".to_string(),
    }
}

impl PhaseError {
    /// Whether `resume` is a meaningful next step after this failure.
    pub fn is_recoverable(&self) -> bool {
        match self {
            PhaseError::PlanRejected => false,
            PhaseError::Assistant(AssistantError::ToolMissing { .. }) => false,
            PhaseError::Gateway(err) => !err.is_tool_missing(),
            PhaseError::Ci(CiError::ToolMissing { .. }) => false,
            _ => true,
        }
    }
}

/// Errors from the workflow orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid workflow name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("workflow '{name}' already exists")]
    AlreadyExists { name: String },

    #[error("workflow '{name}' not found")]
    NotFound { name: String },

    #[error("workflow '{name}' is in use by another process")]
    InUse { name: String },

    #[error("cannot enter phase {phase}: missing artifact(s) {}", format_artifacts(.missing))]
    MissingPrerequisites {
        phase: Phase,
        missing: Vec<ArtifactType>,
    },

    #[error("workflow '{name}' is already {phase}")]
    Terminal { name: String, phase: Phase },

    #[error("phase {phase} failed: {message}")]
    PhaseFailed {
        phase: Phase,
        message: String,
        recoverable: bool,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn format_artifacts(artifacts: &[ArtifactType]) -> String {
    artifacts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_not_found_maps_to_tool_missing() {
        let err: GatewayError = ExecError::NotFound {
            program: "gh".into(),
        }
        .into();
        assert!(err.is_tool_missing());
        assert!(err.to_string().contains("gh"));
    }

    #[test]
    fn exec_timeout_maps_to_gateway_timeout() {
        let err: GatewayError = ExecError::TimedOut {
            program: "gh".into(),
            timeout: Duration::from_secs(30),
        }
        .into();
        assert!(err.is_timeout());
    }

    #[test]
    fn assistant_timeout_carries_duration() {
        let err: AssistantError = ExecError::TimedOut {
            program: "claude".into(),
            timeout: Duration::from_secs(600),
        }
        .into();
        match err {
            AssistantError::Timeout { timeout } => assert_eq!(timeout, Duration::from_secs(600)),
            other => panic!("Expected Timeout, got {other:?}"),
        }
    }

    #[test]
    fn ci_fatal_errors() {
        assert!(CiError::NoPullRequest.is_fatal());
        assert!(CiError::ToolMissing { program: "gh".into() }.is_fatal());
        assert!(!CiError::TimeoutExhausted { attempts: 3 }.is_fatal());
    }

    #[test]
    fn rollback_error_lists_every_failure() {
        let err = RollbackError {
            failures: vec![
                RollbackFailure {
                    step: "close PR #2".into(),
                    error: GatewayError::InvalidInput("a".into()),
                },
                RollbackFailure {
                    step: "delete remote branch x".into(),
                    error: GatewayError::InvalidInput("b".into()),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 failure(s)"));
        assert!(msg.contains("close PR #2"));
        assert!(msg.contains("delete remote branch x"));
    }

    #[test]
    fn phase_error_recoverability() {
        assert!(!PhaseError::PlanRejected.is_recoverable());
        assert!(PhaseError::Aborted.is_recoverable());
        assert!(
            !PhaseError::Assistant(AssistantError::ToolMissing {
                program: "claude".into()
            })
            .is_recoverable()
        );
        assert!(
            PhaseError::Assistant(AssistantError::Timeout {
                timeout: Duration::from_secs(1)
            })
            .is_recoverable()
        );
        assert!(PhaseError::CiAttemptsExhausted { attempts: 3 }.is_recoverable());
    }

    #[test]
    fn split_phase_error_mentions_rollback_state() {
        let err = PhaseError::Split {
            source: SplitError::InvalidInput("x".into()),
            rollback: None,
        };
        assert!(err.to_string().contains("rolled back"));
    }

    #[test]
    fn missing_prerequisites_lists_artifacts() {
        let err = OrchestratorError::MissingPrerequisites {
            phase: Phase::Implementation,
            missing: vec![ArtifactType::Plan, ArtifactType::Approval],
        };
        let msg = err.to_string();
        assert!(msg.contains("plan"));
        assert!(msg.contains("approval"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&GatewayError::InvalidInput("x".into()));
        assert_std_error(&CiError::NoPullRequest);
        assert_std_error(&PhaseError::Aborted);
        assert_std_error(&OrchestratorError::NotFound { name: "x".into() });
    }
}
