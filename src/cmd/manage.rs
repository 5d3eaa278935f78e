//! Workflow management: init, list, status, delete and clean.

use anyhow::{Context, Result};
use dialoguer::Confirm;
use std::path::Path;

use shipwright::config::{CONFIG_FILE, STATE_DIR, ShipwrightToml};
use shipwright::errors::OrchestratorError;
use shipwright::ui::display;

use super::super::Cli;
use super::{build_orchestrator, load_config};

const GITIGNORE: &str = "workflows/\nworktrees/\nlogs/\n";

pub fn cmd_init(base_dir: &Path) -> Result<()> {
    let state_dir = base_dir.join(STATE_DIR);
    let was_initialized = state_dir.join(CONFIG_FILE).exists();

    for sub in ["workflows", "worktrees", "logs"] {
        std::fs::create_dir_all(state_dir.join(sub))
            .with_context(|| format!("Failed to create {}", state_dir.join(sub).display()))?;
    }
    let gitignore = state_dir.join(".gitignore");
    if !gitignore.exists() {
        std::fs::write(&gitignore, GITIGNORE)
            .with_context(|| format!("Failed to write {}", gitignore.display()))?;
    }

    if was_initialized {
        println!("Shipwright already initialized at {}", state_dir.display());
        println!("Directory structure verified.");
        return Ok(());
    }

    ShipwrightToml::default().save(&state_dir.join(CONFIG_FILE))?;
    println!("Initialized shipwright at {}", state_dir.display());
    println!();
    println!("Created directory structure:");
    println!("  {}/", STATE_DIR);
    println!("  ├── {}   # Settings (assistant, timeouts, CI, split)", CONFIG_FILE);
    println!("  ├── workflows/        # Workflow state, plans and assistant logs");
    println!("  ├── worktrees/        # One working copy per workflow");
    println!("  └── logs/             # Shipwright's own log");
    println!();
    println!("Next: shipwright start <name> --description \"...\"");
    Ok(())
}

pub fn cmd_list(cli: &Cli, base_dir: &Path) -> Result<()> {
    let orchestrator = build_orchestrator(load_config(cli, base_dir, None)?);
    let workflows = orchestrator.list()?;
    println!();
    print!("{}", display::render_workflow_list(&workflows));
    println!();
    Ok(())
}

pub fn cmd_status(cli: &Cli, base_dir: &Path, name: &str) -> Result<()> {
    let orchestrator = build_orchestrator(load_config(cli, base_dir, None)?);
    let workflow = orchestrator.status(name)?;
    println!();
    print!("{}", display::render_workflow_status(&workflow));
    if let Ok(Some(plan)) = orchestrator.state().load_plan(name) {
        println!();
        println!(
            "Plan: {} ({} phase(s), ~{} lines)",
            plan.summary.lines().next().unwrap_or_default(),
            plan.phases.len(),
            plan.estimated_lines()
        );
    }
    println!();
    Ok(())
}

pub async fn cmd_delete(cli: &Cli, base_dir: &Path, name: &str, force: bool) -> Result<()> {
    let orchestrator = build_orchestrator(load_config(cli, base_dir, None)?);
    // Surface NotFound before prompting. An unreadable record can still be deleted.
    match orchestrator.status(name) {
        Err(e @ (OrchestratorError::NotFound { .. } | OrchestratorError::InvalidName { .. })) => {
            return Err(e.into());
        }
        _ => {}
    }

    if !force {
        let confirm = Confirm::new()
            .with_prompt(format!("Delete workflow '{}' and its worktree?", name))
            .default(false)
            .interact()
            .unwrap_or(false);
        if !confirm {
            println!("Delete cancelled");
            return Ok(());
        }
    }

    orchestrator.delete(name).await?;
    println!("Deleted workflow {}", name);
    Ok(())
}

pub async fn cmd_clean(cli: &Cli, base_dir: &Path, all: bool) -> Result<()> {
    let orchestrator = build_orchestrator(load_config(cli, base_dir, None)?);
    let removed = orchestrator.clean(all).await?;
    if removed.is_empty() {
        println!("Nothing to clean");
    } else {
        for name in &removed {
            println!("Removed {}", name);
        }
        println!("{} workflow(s) removed", removed.len());
    }
    Ok(())
}
