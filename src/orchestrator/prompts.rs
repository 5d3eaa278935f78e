//! Phase prompts handed to the assistant.

use std::fmt::Write;

use crate::ci::{CIFailureCategory, ClassifiedCIResult};
use crate::vcs::CommitInfo;
use crate::workflow::{Plan, Workflow};

fn header(workflow: &Workflow) -> String {
    format!(
        "# Task: {}\n\nType: {}\n\n{}\n",
        workflow.name,
        workflow.workflow_type,
        workflow.description.trim()
    )
}

fn plan_outline(plan: &Plan) -> String {
    let mut out = format!("## Plan\n\n{}\n\n", plan.summary.trim());
    if !plan.architecture.overview.is_empty() {
        let _ = writeln!(out, "Architecture: {}\n", plan.architecture.overview);
    }
    for (i, phase) in plan.phases.iter().enumerate() {
        let _ = writeln!(out, "{}. **{}**: {}", i + 1, phase.name, phase.description);
        if !phase.files.is_empty() {
            let _ = writeln!(out, "   Files: {}", phase.files.join(", "));
        }
    }
    if !plan.risks.is_empty() {
        out.push_str("\nRisks:\n");
        for risk in &plan.risks {
            let _ = writeln!(out, "- {} (mitigation: {})", risk.description, risk.mitigation);
        }
    }
    out
}

pub fn planning(workflow: &Workflow) -> String {
    format!(
        "{}\n## Instructions\n\n\
         Study the repository and produce an implementation plan for this task. \
         Break the work into ordered phases with line estimates, list the files each \
         phase touches, note independent work streams and their dependencies, and \
         call out risks. Do not modify any files.\n",
        header(workflow)
    )
}

pub fn implementation(workflow: &Workflow, plan: &Plan) -> String {
    format!(
        "{}\n{}\n## Instructions\n\n\
         Implement the plan above in this working copy, phase by phase. Add tests for \
         new behaviour and keep the build green. Do not push or open pull requests.\n",
        header(workflow),
        plan_outline(plan)
    )
}

pub fn refactoring(workflow: &Workflow, plan: &Plan) -> String {
    format!(
        "{}\n{}\n## Instructions\n\n\
         The plan has been implemented on this branch. Review the change as a whole: \
         remove duplication, tighten naming, delete dead code, and make sure tests \
         and linters pass. Do not change behaviour.\n",
        header(workflow),
        plan_outline(plan)
    )
}

pub fn ci_fix(workflow: &Workflow, classified: &ClassifiedCIResult, attempt: u32) -> String {
    let mut jobs = String::new();
    for reason in classified
        .reasons
        .iter()
        .filter(|r| r.category == CIFailureCategory::CodeRelated)
    {
        let _ = writeln!(
            jobs,
            "- {} ({}): {}",
            reason.job_name, reason.conclusion, reason.explanation
        );
    }
    format!(
        "{}\n## CI failures (fix attempt {})\n\n{}\n## Instructions\n\n\
         CI is failing on this branch. Reproduce the failing jobs locally, find the \
         cause in the code and fix it. Do not disable or skip tests.\n",
        header(workflow),
        attempt,
        jobs
    )
}

pub fn split(workflow: &Workflow, commits: &[CommitInfo]) -> String {
    let mut log = String::new();
    for commit in commits {
        let _ = writeln!(log, "- {} {}", commit.sha, commit.subject);
    }
    format!(
        "{}\n## Commits on this branch\n\n{}\n## Instructions\n\n\
         This change is too large to review as one pull request. Propose a split into \
         a parent PR and an ordered list of child PRs, each reviewable on its own. \
         Use the `by_commit` strategy and list commit hashes when the commits are \
         cleanly separable, otherwise use `by_file` and list file paths. Every commit \
         or file must appear in exactly one child, and each child may depend only on \
         the ones before it.\n",
        header(workflow),
        log
    )
}

pub fn pr_title(workflow: &Workflow) -> String {
    let first_line = workflow.description.lines().next().unwrap_or("").trim();
    let subject = if first_line.is_empty() {
        workflow.name.as_str()
    } else {
        first_line
    };
    format!("{}: {}", workflow.workflow_type, subject)
}

pub fn pr_body(workflow: &Workflow, plan: Option<&Plan>) -> String {
    let mut body = format!("{}\n", workflow.description.trim());
    if let Some(plan) = plan {
        body.push('\n');
        body.push_str(&plan_outline(plan));
    }
    body
}
