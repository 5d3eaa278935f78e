//! Construction of VCS and review gateways for a working directory.
//!
//! A workflow runs in its own worktree, so gateways are built per directory
//! rather than once per process.

use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::exec::{CommandRunner, ExecContext};
use crate::review::{GhCli, ReviewGateway};
use crate::vcs::{GitCli, Vcs};

pub trait GatewayFactory: Send + Sync {
    fn vcs(&self, dir: &Path) -> Arc<dyn Vcs>;
    fn review(&self, dir: &Path) -> Arc<dyn ReviewGateway>;
}

/// `git` and `gh` over a shared [`CommandRunner`].
pub struct CliGateways {
    runner: Arc<dyn CommandRunner>,
    ctx: ExecContext,
}

impl CliGateways {
    pub fn new(runner: Arc<dyn CommandRunner>, ctx: ExecContext) -> Self {
        Self { runner, ctx }
    }

    /// Command timeout and child environment come from `config`.
    pub fn from_config(runner: Arc<dyn CommandRunner>, config: &Config) -> Self {
        let ctx = ExecContext::new(config.repo_dir.clone(), config.timeouts.command)
            .with_env(config.env.clone());
        Self::new(runner, ctx)
    }
}

impl GatewayFactory for CliGateways {
    fn vcs(&self, dir: &Path) -> Arc<dyn Vcs> {
        Arc::new(GitCli::new(self.runner.clone(), self.ctx.in_dir(dir)))
    }

    fn review(&self, dir: &Path) -> Arc<dyn ReviewGateway> {
        Arc::new(GhCli::new(self.runner.clone(), self.ctx.in_dir(dir)))
    }
}
