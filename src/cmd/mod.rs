//! CLI command implementations.
//!
//! | Module     | Commands handled                               |
//! |------------|------------------------------------------------|
//! | `workflow` | `Start`, `Resume`                              |
//! | `manage`   | `Init`, `List`, `Status`, `Delete`, `Clean`    |

pub mod manage;
pub mod workflow;

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use shipwright::assistant::ClaudeExecutor;
use shipwright::clock::TokioClock;
use shipwright::config::{CliOverrides, Config};
use shipwright::exec::{CommandRunner, TokioCommandRunner};
use shipwright::gates::ApprovalGate;
use shipwright::gateways::CliGateways;
use shipwright::orchestrator::{Orchestrator, Services};

use super::{Cli, RunArgs};

pub use manage::{cmd_clean, cmd_delete, cmd_init, cmd_list, cmd_status};
pub use workflow::{cmd_resume, cmd_start};

pub(crate) fn load_config(cli: &Cli, base_dir: &Path, run: Option<&RunArgs>) -> Result<Config> {
    let overrides = CliOverrides {
        assistant_cmd: run.and_then(|r| r.assistant.clone()),
        planning_timeout: run.and_then(|r| r.planning_timeout),
        implementation_timeout: run.and_then(|r| r.implementation_timeout),
        refactoring_timeout: run.and_then(|r| r.refactoring_timeout),
        split: run.and_then(|r| r.split_override()),
        verbose: cli.verbose,
        yes: cli.yes,
    };
    Config::load(base_dir, &overrides)
}

/// Wire the production gateways into an orchestrator.
pub(crate) fn build_orchestrator(config: Config) -> Orchestrator {
    let runner: Arc<dyn CommandRunner> = Arc::new(TokioCommandRunner);
    let services = Services {
        gateways: Arc::new(CliGateways::from_config(runner.clone(), &config)),
        assistant: Arc::new(ClaudeExecutor::new(
            runner,
            config.assistant_cmd.clone(),
            config.assistant_flags(),
            config.env.clone(),
        )),
        approver: Arc::new(ApprovalGate::new(config.auto_approve)),
        clock: Arc::new(TokioClock),
    };
    Orchestrator::new(config, services)
}
