//! Commands that run a workflow: start and resume.

use anyhow::{Result, bail};
use console::style;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use shipwright::errors::OrchestratorError;
use shipwright::orchestrator::Orchestrator;
use shipwright::ui::WorkflowUI;
use shipwright::workflow::{Workflow, WorkflowType};

use super::super::{Cli, RunArgs};
use super::{build_orchestrator, load_config};

pub async fn cmd_start(
    cli: &Cli,
    base_dir: &Path,
    name: &str,
    description: &str,
    workflow_type: WorkflowType,
    run: &RunArgs,
) -> Result<()> {
    let config = load_config(cli, base_dir, Some(run))?;
    config.ensure_directories()?;
    let ui = Arc::new(WorkflowUI::new(config.verbose));
    let orchestrator = build_orchestrator(config).with_observer(ui.clone());

    println!(
        "Starting {} workflow {}",
        workflow_type,
        style(name).bold()
    );
    let outcome = interruptible(name, orchestrator.start(name, description, workflow_type)).await;
    report(&orchestrator, &ui, name, outcome)
}

pub async fn cmd_resume(cli: &Cli, base_dir: &Path, name: &str, run: &RunArgs) -> Result<()> {
    let config = load_config(cli, base_dir, Some(run))?;
    config.ensure_directories()?;
    let ui = Arc::new(WorkflowUI::new(config.verbose));
    let orchestrator = build_orchestrator(config).with_observer(ui.clone());

    let workflow = orchestrator.status(name)?;
    println!(
        "Resuming workflow {} at {}",
        style(name).bold(),
        style(workflow.current_phase).yellow()
    );
    let outcome = interruptible(name, orchestrator.resume(name, run.split_override())).await;
    report(&orchestrator, &ui, name, outcome)
}

/// Run until the workflow stops or Ctrl-C arrives. Dropping the run future
/// kills any child process and releases the workflow lock; the persisted
/// state stays on the interrupted phase so `resume` picks it up.
async fn interruptible(
    name: &str,
    run: impl Future<Output = Result<Workflow, OrchestratorError>>,
) -> Result<Workflow> {
    tokio::select! {
        outcome = run => Ok(outcome?),
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(workflow = name, "interrupted");
            bail!("Interrupted. Run 'shipwright resume {}' to continue.", name)
        }
    }
}

fn report(
    orchestrator: &Orchestrator,
    ui: &WorkflowUI,
    name: &str,
    outcome: Result<Workflow>,
) -> Result<()> {
    match outcome {
        Ok(workflow) => {
            ui.finish(&workflow);
            Ok(())
        }
        Err(e) => {
            if let Ok(workflow) = orchestrator.status(name) {
                ui.finish(&workflow);
            }
            Err(e)
        }
    }
}
