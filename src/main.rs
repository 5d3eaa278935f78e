use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use shipwright::config::STATE_DIR;
use shipwright::workflow::WorkflowType;

mod cmd;

#[derive(Parser)]
#[command(name = "shipwright")]
#[command(
    version,
    about = "AI-assisted development workflows: plan, implement, refactor, gate on CI and split into stacked PRs"
)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Approve plans without prompting
    #[arg(long, global = true)]
    pub yes: bool,

    /// Repository to operate on (defaults to the current directory)
    #[arg(long, global = true)]
    pub base_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Per-run overrides shared by `start` and `resume`.
#[derive(Args, Clone, Debug, Default)]
pub struct RunArgs {
    /// Split the finished change into a parent PR and stacked child PRs
    #[arg(long)]
    pub split: bool,

    /// Keep the change as a single PR even if splitting is configured
    #[arg(long, conflicts_with = "split")]
    pub no_split: bool,

    /// Assistant executable to invoke
    #[arg(long, value_name = "PATH")]
    pub assistant: Option<String>,

    #[arg(long, value_name = "SECS")]
    pub planning_timeout: Option<u64>,

    #[arg(long, value_name = "SECS")]
    pub implementation_timeout: Option<u64>,

    #[arg(long, value_name = "SECS")]
    pub refactoring_timeout: Option<u64>,
}

impl RunArgs {
    pub fn split_override(&self) -> Option<bool> {
        match (self.split, self.no_split) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the .shipwright directory with a default shipwright.toml
    Init,
    /// Start a new workflow
    Start {
        /// Workflow name, used for the state directory and branch
        name: String,

        /// What to build or fix
        #[arg(short, long)]
        description: String,

        #[arg(short = 't', long = "type", value_enum, default_value_t = WorkflowType::Feature)]
        workflow_type: WorkflowType,

        #[command(flatten)]
        run: RunArgs,
    },
    /// Continue a workflow from its current phase
    Resume {
        name: String,

        #[command(flatten)]
        run: RunArgs,
    },
    /// List workflows
    List,
    /// Show a workflow's phases, artifacts and pull requests
    Status { name: String },
    /// Delete a workflow's state and worktree
    Delete {
        name: String,

        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },
    /// Delete completed workflows
    Clean {
        /// Also delete failed workflows
        #[arg(long)]
        all: bool,
    },
}

/// Logs go to stderr, plus a file under `.shipwright/logs` once the state
/// directory exists. The returned guard flushes the file writer on drop.
fn init_tracing(base_dir: &Path, verbose: bool) -> Option<WorkerGuard> {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    };
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter());

    let log_dir = base_dir.join(STATE_DIR).join("logs");
    if log_dir.is_dir() {
        let appender = tracing_appender::rolling::never(&log_dir, "shipwright.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_filter(EnvFilter::new("shipwright=debug"));
        tracing_subscriber::registry()
            .with(stderr_layer)
            .with(file_layer)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::registry().with(stderr_layer).init();
        None
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let base_dir = match cli.base_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let _log_guard = init_tracing(&base_dir, cli.verbose);

    match &cli.command {
        Commands::Init => cmd::cmd_init(&base_dir)?,
        Commands::Start {
            name,
            description,
            workflow_type,
            run,
        } => cmd::cmd_start(&cli, &base_dir, name, description, *workflow_type, run).await?,
        Commands::Resume { name, run } => cmd::cmd_resume(&cli, &base_dir, name, run).await?,
        Commands::List => cmd::cmd_list(&cli, &base_dir)?,
        Commands::Status { name } => cmd::cmd_status(&cli, &base_dir, name)?,
        Commands::Delete { name, force } => {
            cmd::cmd_delete(&cli, &base_dir, name, *force || cli.yes).await?
        }
        Commands::Clean { all } => cmd::cmd_clean(&cli, &base_dir, *all).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn start_parses_type_and_overrides() {
        let cli = Cli::try_parse_from([
            "shipwright",
            "start",
            "auth",
            "-d",
            "Add login",
            "--type",
            "fix",
            "--split",
            "--planning-timeout",
            "60",
        ])
        .unwrap();
        match cli.command {
            Commands::Start {
                name,
                workflow_type,
                run,
                ..
            } => {
                assert_eq!(name, "auth");
                assert_eq!(workflow_type, WorkflowType::Fix);
                assert_eq!(run.split_override(), Some(true));
                assert_eq!(run.planning_timeout, Some(60));
            }
            _ => panic!("expected start"),
        }
    }

    #[test]
    fn split_flags_conflict() {
        assert!(
            Cli::try_parse_from(["shipwright", "resume", "auth", "--split", "--no-split"]).is_err()
        );
    }

    #[test]
    fn resume_without_split_flags_keeps_workflow_setting() {
        let run = RunArgs::default();
        assert_eq!(run.split_override(), None);
    }
}
