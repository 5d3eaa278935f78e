use std::time::Duration;

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::assistant::AssistantEvent;
use crate::ci::{CiProgress, ClassifiedCIResult};
use crate::errors::PhaseError;
use crate::orchestrator::WorkflowObserver;
use crate::split::PRSplitResult;
use crate::ui::display;
use crate::ui::icons::{
    CHECK, CLOCK, CROSS, LINK, RUNNING, SKIP, SPARKLE, THINKING, TOOL, WARNING,
};
use crate::workflow::{Phase, PhaseStatus, Plan, Workflow};

/// Terminal UI for a running workflow.
///
/// Two stacked bars: the phase bar counts pipeline phases, the activity
/// spinner shows what the current phase is doing. The spinner ticks on its
/// own thread, so observer callbacks only swap its message.
pub struct WorkflowUI {
    multi: MultiProgress,
    phase_bar: ProgressBar,
    activity: ProgressBar,
    verbose: bool,
}

pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

fn ci_message(progress: &CiProgress) -> String {
    match progress {
        CiProgress::Waiting { remaining, .. } => {
            format!("Waiting for CI to start ({} left)", format_elapsed(*remaining))
        }
        CiProgress::Checking { attempt, elapsed } => {
            format!("Checking CI, poll {} ({})", attempt, format_elapsed(*elapsed))
        }
        CiProgress::Retry {
            attempt,
            delay,
            reason,
        } => format!(
            "CI check {} failed, retrying in {}: {}",
            attempt,
            format_elapsed(*delay),
            reason
        ),
        CiProgress::Status { counts, elapsed } => {
            format!("CI {} ({})", counts, format_elapsed(*elapsed))
        }
    }
}

impl WorkflowUI {
    pub fn new(verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let phase_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");
        let phase_bar = multi.add(ProgressBar::new(Phase::PIPELINE.len() as u64));
        phase_bar.set_style(phase_style);
        phase_bar.set_prefix("Phases");

        let activity_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");
        let activity = multi.add(ProgressBar::new_spinner());
        activity.set_style(activity_style);
        activity.set_prefix("      ");

        Self {
            multi,
            phase_bar,
            activity,
            verbose,
        }
    }

    /// Print above the bars, falling back to stderr if the terminal is gone.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    fn sync_position(&self, workflow: &Workflow) {
        let done = Phase::PIPELINE
            .iter()
            .filter(|p| {
                matches!(
                    workflow.phase_state(**p).status,
                    PhaseStatus::Completed | PhaseStatus::Skipped
                )
            })
            .count();
        self.phase_bar.set_position(done as u64);
    }

    /// Clear the bars and print the final outcome.
    pub fn finish(&self, workflow: &Workflow) {
        self.activity.finish_and_clear();
        self.phase_bar.finish_and_clear();
        match workflow.current_phase {
            Phase::Completed => println!(
                "{}Workflow {} completed",
                SPARKLE,
                style(&workflow.name).bold()
            ),
            _ => println!(
                "{}Workflow {} stopped at {} ({})",
                WARNING,
                style(&workflow.name).bold(),
                style(workflow.current_phase).yellow(),
                workflow.status_label()
            ),
        }
        if let Some(url) = &workflow.pr_url {
            println!("  {}{}", LINK, url);
        }
    }
}

impl WorkflowObserver for WorkflowUI {
    fn phase_started(&self, workflow: &Workflow, phase: Phase) {
        self.sync_position(workflow);
        self.phase_bar
            .set_message(format!("{}", style(phase).yellow()));
        self.print_line(format!("{}{}", RUNNING, style(phase).bold()));
        self.activity.set_message("starting");
        self.activity.enable_steady_tick(Duration::from_millis(100));
    }

    fn phase_finished(&self, workflow: &Workflow, phase: Phase, status: PhaseStatus) {
        self.sync_position(workflow);
        self.activity.set_message("");
        match status {
            PhaseStatus::Skipped => self.print_line(format!("{}{} skipped", SKIP, phase)),
            _ => self.print_line(format!("{}{} complete", CHECK, style(phase).green())),
        }
    }

    fn phase_failed(&self, _workflow: &Workflow, phase: Phase, error: &PhaseError) {
        self.activity.disable_steady_tick();
        self.activity.set_message("");
        self.print_line(format!(
            "{}{} failed: {}",
            CROSS,
            style(phase).red(),
            style(error).red()
        ));
        if error.is_recoverable() {
            self.print_line(format!("  {}", style("Fix the cause and resume the workflow.").dim()));
        }
    }

    fn plan_ready(&self, plan: &Plan) {
        self.activity.disable_steady_tick();
        let rendered = display::render_plan(plan);
        self.multi.suspend(|| println!("{}", rendered));
    }

    fn assistant_event(&self, event: &AssistantEvent) {
        match event {
            AssistantEvent::ToolUse { description, .. } => {
                self.activity
                    .set_message(format!("{}{}", TOOL, style(description).yellow()));
                self.print_line(format!("    {}{}", TOOL, style(description).yellow()));
            }
            AssistantEvent::Thinking(snippet) => {
                self.activity
                    .set_message(format!("{}{}", THINKING, style(snippet).dim()));
                if self.verbose {
                    self.print_line(format!("    {}{}", THINKING, style(snippet).dim()));
                }
            }
        }
    }

    fn ci_progress(&self, progress: &CiProgress) {
        let message = ci_message(progress);
        if self.verbose && matches!(progress, CiProgress::Retry { .. }) {
            self.print_line(format!("    {}{}", CLOCK, style(&message).dim()));
        }
        self.activity.set_message(message);
    }

    fn ci_classified(&self, classified: &ClassifiedCIResult) {
        let Some(category) = classified.category else {
            return;
        };
        self.print_line(format!(
            "{}CI failed ({}): {}",
            WARNING,
            style(category).yellow(),
            classified.recommended_action
        ));
        for reason in &classified.reasons {
            self.print_line(format!(
                "    {} {} {}",
                style(&reason.job_name).bold(),
                style(reason.category).dim(),
                style(&reason.explanation).dim()
            ));
        }
    }

    fn split_created(&self, result: &PRSplitResult) {
        if let Some(parent) = &result.parent_pr {
            self.print_line(format!("{}parent #{} {}", LINK, parent.number, parent.url));
        }
        for child in &result.child_prs {
            self.print_line(format!("    {}#{} {}", LINK, child.number, child.title));
        }
    }

    fn message(&self, text: &str) {
        self.print_line(format!("  {}", text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ci::CiCounts;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_secs(42)), "42s");
        assert_eq!(format_elapsed(Duration::from_secs(125)), "2m 5s");
    }

    #[test]
    fn test_ci_messages() {
        let waiting = CiProgress::Waiting {
            elapsed: Duration::from_secs(5),
            remaining: Duration::from_secs(25),
        };
        assert_eq!(ci_message(&waiting), "Waiting for CI to start (25s left)");

        let status = CiProgress::Status {
            counts: CiCounts::default(),
            elapsed: Duration::from_secs(90),
        };
        assert!(ci_message(&status).ends_with("(1m 30s)"));
    }
}
