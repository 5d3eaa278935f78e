//! Static views: workflow list, workflow status and the plan shown at the
//! approval gate. Everything renders to a `String` so commands decide where
//! it goes.

use std::fmt::Write;

use console::style;

use crate::workflow::{ArtifactType, Phase, PhaseStatus, Plan, Workflow};

const WRAP_WIDTH: usize = 88;

/// Wrap `text` to [`WRAP_WIDTH`] with every line indented by `indent`.
fn wrapped(text: &str, indent: &str) -> String {
    let options = textwrap::Options::new(WRAP_WIDTH)
        .initial_indent(indent)
        .subsequent_indent(indent);
    textwrap::fill(text.trim(), options)
}

fn status_cell(status: PhaseStatus) -> String {
    let label = format!("{:<12}", status);
    match status {
        PhaseStatus::Completed => style(label).green().to_string(),
        PhaseStatus::InProgress => style(label).yellow().to_string(),
        PhaseStatus::Failed => style(label).red().to_string(),
        PhaseStatus::Skipped | PhaseStatus::Pending => style(label).dim().to_string(),
    }
}

pub fn render_workflow_list(workflows: &[Workflow]) -> String {
    if workflows.is_empty() {
        return "No workflows. Start one with 'shipwright start <name> <description>'.\n".into();
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<24} {:<9} {:<16} {:<10} Updated",
        "Name", "Type", "Phase", "Status"
    );
    let _ = writeln!(
        out,
        "{:<24} {:<9} {:<16} {:<10} -------",
        "-".repeat(24),
        "-".repeat(9),
        "-".repeat(16),
        "-".repeat(10)
    );
    for wf in workflows {
        let _ = writeln!(
            out,
            "{:<24} {:<9} {:<16} {:<10} {}",
            wf.name,
            wf.workflow_type,
            wf.current_phase,
            wf.status_label(),
            wf.updated_at.format("%Y-%m-%d %H:%M")
        );
    }
    let _ = writeln!(out, "\n{} workflow(s)", workflows.len());
    out
}

pub fn render_workflow_status(workflow: &Workflow) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", style(format!("Workflow: {}", workflow.name)).bold());
    let _ = writeln!(out, "Type:        {}", workflow.workflow_type);
    let _ = writeln!(out, "Phase:       {}", workflow.current_phase);
    let _ = writeln!(out, "Status:      {}", workflow.status_label());
    if let Some(branch) = &workflow.branch {
        let _ = writeln!(out, "Branch:      {}", branch);
    }
    if let Some(path) = &workflow.worktree_path {
        let _ = writeln!(out, "Worktree:    {}", path.display());
    }
    if let (Some(number), Some(url)) = (workflow.pr_number, &workflow.pr_url) {
        let _ = writeln!(out, "Pull req:    #{} {}", number, url);
    }
    let _ = writeln!(out, "Split PRs:   {}", if workflow.split_enabled { "on" } else { "off" });
    let _ = writeln!(out, "Created:     {}", workflow.created_at.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out, "Updated:     {}", workflow.updated_at.format("%Y-%m-%d %H:%M:%S"));

    out.push('\n');
    let _ = writeln!(out, "{:<16} {:<12} {:<9} Completed", "Phase", "Status", "Attempts");
    for phase in Phase::PIPELINE {
        let state = workflow.phase_state(phase);
        let completed = state
            .completed_at
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "{:<16} {} {:<9} {}",
            phase,
            status_cell(state.status),
            state.attempts,
            completed
        );
    }

    let artifacts: Vec<String> = workflow.artifacts.iter().map(ArtifactType::to_string).collect();
    out.push('\n');
    let _ = writeln!(
        out,
        "Artifacts:   {}",
        if artifacts.is_empty() {
            "none".to_string()
        } else {
            artifacts.join(", ")
        }
    );

    if !workflow.ci_history.is_empty() {
        let _ = writeln!(out, "CI failures: {} recorded", workflow.ci_history.len());
    }

    if let Some(split) = &workflow.split_result {
        out.push('\n');
        let _ = writeln!(out, "Split into {} PR(s):", split.pr_count());
        if let Some(parent) = &split.parent_pr {
            let _ = writeln!(out, "  #{} {} (parent)", parent.number, parent.title);
        }
        for child in &split.child_prs {
            let _ = writeln!(out, "  #{} {}", child.number, child.title);
        }
    }

    if let Some(err) = &workflow.error {
        out.push('\n');
        let _ = writeln!(
            out,
            "{} {} ({})",
            style("Error:").red().bold(),
            err.message,
            if err.recoverable {
                "recoverable, run 'shipwright resume'"
            } else {
                "not recoverable"
            }
        );
    }
    out
}

pub fn render_plan(plan: &Plan) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{}", style("Implementation plan").bold().underlined());
    let _ = writeln!(out, "{}\n", wrapped(&plan.summary, ""));
    let _ = writeln!(
        out,
        "Complexity: {}   Estimate: ~{} lines across {} file(s)",
        plan.complexity,
        plan.estimated_lines(),
        plan.estimates.total_files
    );
    if !plan.architecture.overview.is_empty() {
        let _ = writeln!(out, "Architecture: {}", plan.architecture.overview);
    }

    out.push('\n');
    for (i, phase) in plan.phases.iter().enumerate() {
        let _ = writeln!(
            out,
            "  {}. {} {}",
            i + 1,
            style(&phase.name).cyan(),
            style(format!("(~{} lines)", phase.estimated_lines)).dim()
        );
        if !phase.description.is_empty() {
            let _ = writeln!(out, "{}", wrapped(&phase.description, "     "));
        }
    }

    if !plan.work_streams.is_empty() {
        out.push('\n');
        let _ = writeln!(out, "Work streams:");
        for ws in &plan.work_streams {
            let deps = if ws.depends_on.is_empty() {
                String::new()
            } else {
                format!(" (after {})", ws.depends_on.join(", "))
            };
            let _ = writeln!(out, "  [{}] {}{}", ws.id, ws.name, deps);
        }
    }

    if !plan.risks.is_empty() {
        out.push('\n');
        let _ = writeln!(out, "Risks:");
        for risk in &plan.risks {
            let _ = writeln!(out, "{}", wrapped(&format!("- {}", risk.description), "  "));
        }
    }
    out
}
