use anyhow::Result;
use dialoguer::{Select, theme::ColorfulTheme};

use crate::workflow::{Plan, Workflow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Approved,
    /// The plan is wrong; the workflow cannot continue.
    Rejected,
    /// Stop for now and decide on resume.
    Aborted,
}

/// Decides whether a plan may be implemented.
pub trait PlanApprover: Send + Sync {
    fn review(&self, workflow: &Workflow, plan: &Plan) -> Result<GateDecision>;
}

/// Interactive confirmation, or unconditional approval with `--yes`.
pub struct ApprovalGate {
    pub auto_approve: bool,
}

impl ApprovalGate {
    pub fn new(auto_approve: bool) -> Self {
        Self { auto_approve }
    }

    fn prompt_user(&self) -> Result<GateDecision> {
        let options = &[
            "Approve and implement",
            "Reject this plan",
            "Stop here (resume later)",
        ];

        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Proceed with this plan?")
            .items(options)
            .default(0)
            .interact()?;

        Ok(match selection {
            0 => GateDecision::Approved,
            1 => GateDecision::Rejected,
            _ => GateDecision::Aborted,
        })
    }
}

impl PlanApprover for ApprovalGate {
    fn review(&self, workflow: &Workflow, plan: &Plan) -> Result<GateDecision> {
        if self.auto_approve {
            println!("  {} (--yes flag)", console::style("Auto-approved").dim());
            tracing::info!(workflow = %workflow.name, "plan auto-approved");
            return Ok(GateDecision::Approved);
        }
        tracing::debug!(
            workflow = %workflow.name,
            phases = plan.phases.len(),
            "asking for plan approval"
        );
        self.prompt_user()
    }
}
