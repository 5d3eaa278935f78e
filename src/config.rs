//! Configuration for Shipwright.
//!
//! Settings are layered: built-in defaults, then `.shipwright/shipwright.toml`,
//! then environment variables, then CLI flags. The resolved [`Config`] is
//! threaded explicitly through the orchestrator and every gateway.
//!
//! # Configuration File Format
//!
//! ```toml
//! [assistant]
//! command = "claude"
//! skip_permissions = true
//!
//! [timeouts]            # seconds
//! planning = 600
//! implementation = 1800
//! refactoring = 1200
//! split = 600
//! command = 120
//!
//! [ci]
//! enabled = true
//! timeout = 1800
//! initial_delay = 30
//! poll_interval = 30
//! progress_interval = 5
//! ignore_pattern = "(?i)e2e|integration"
//! persistent_threshold = 3
//! max_fix_attempts = 3
//!
//! [split]
//! enabled = false
//! main_branch = "main"
//!
//! [workflow]
//! use_worktrees = true
//! branch_prefix = "shipwright"
//!
//! [env]
//! GH_PROMPT_DISABLED = "1"
//! ```

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the per-repository state directory.
pub const STATE_DIR: &str = ".shipwright";
/// Name of the configuration file inside [`STATE_DIR`].
pub const CONFIG_FILE: &str = "shipwright.toml";

/// Default CI ignore filter: end-to-end and integration suites are often flaky
/// and slow, so they do not block the gate unless configured otherwise.
pub const DEFAULT_CI_IGNORE_PATTERN: &str = "(?i)e2e|integration";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantSection {
    #[serde(default = "default_assistant_cmd")]
    pub command: String,
    #[serde(default = "default_true")]
    pub skip_permissions: bool,
}

impl Default for AssistantSection {
    fn default() -> Self {
        Self {
            command: default_assistant_cmd(),
            skip_permissions: true,
        }
    }
}

/// Per-phase timeouts, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsSection {
    #[serde(default = "default_planning_timeout")]
    pub planning: u64,
    #[serde(default = "default_implementation_timeout")]
    pub implementation: u64,
    #[serde(default = "default_refactoring_timeout")]
    pub refactoring: u64,
    #[serde(default = "default_split_timeout")]
    pub split: u64,
    /// Timeout for individual `git`/`gh` invocations.
    #[serde(default = "default_command_timeout")]
    pub command: u64,
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        Self {
            planning: default_planning_timeout(),
            implementation: default_implementation_timeout(),
            refactoring: default_refactoring_timeout(),
            split: default_split_timeout(),
            command: default_command_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ci_timeout")]
    pub timeout: u64,
    #[serde(default = "default_ci_initial_delay")]
    pub initial_delay: u64,
    #[serde(default = "default_ci_poll_interval")]
    pub poll_interval: u64,
    #[serde(default = "default_ci_progress_interval")]
    pub progress_interval: u64,
    /// Jobs whose names match are dropped before deciding pass/fail.
    /// An empty string disables filtering.
    #[serde(default = "default_ci_ignore_pattern")]
    pub ignore_pattern: String,
    #[serde(default = "default_persistent_threshold")]
    pub persistent_threshold: u32,
    #[serde(default = "default_max_fix_attempts")]
    pub max_fix_attempts: u32,
}

impl Default for CiSection {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: default_ci_timeout(),
            initial_delay: default_ci_initial_delay(),
            poll_interval: default_ci_poll_interval(),
            progress_interval: default_ci_progress_interval(),
            ignore_pattern: default_ci_ignore_pattern(),
            persistent_threshold: default_persistent_threshold(),
            max_fix_attempts: default_max_fix_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_main_branch")]
    pub main_branch: String,
}

impl Default for SplitSection {
    fn default() -> Self {
        Self {
            enabled: false,
            main_branch: default_main_branch(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSection {
    #[serde(default = "default_true")]
    pub use_worktrees: bool,
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            use_worktrees: true,
            branch_prefix: default_branch_prefix(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_assistant_cmd() -> String {
    "claude".to_string()
}
fn default_planning_timeout() -> u64 {
    600
}
fn default_implementation_timeout() -> u64 {
    1800
}
fn default_refactoring_timeout() -> u64 {
    1200
}
fn default_split_timeout() -> u64 {
    600
}
fn default_command_timeout() -> u64 {
    120
}
fn default_ci_timeout() -> u64 {
    1800
}
fn default_ci_initial_delay() -> u64 {
    30
}
fn default_ci_poll_interval() -> u64 {
    30
}
fn default_ci_progress_interval() -> u64 {
    5
}
fn default_ci_ignore_pattern() -> String {
    DEFAULT_CI_IGNORE_PATTERN.to_string()
}
fn default_persistent_threshold() -> u32 {
    3
}
fn default_max_fix_attempts() -> u32 {
    3
}
fn default_main_branch() -> String {
    "main".to_string()
}
fn default_branch_prefix() -> String {
    "shipwright".to_string()
}

/// Contents of `.shipwright/shipwright.toml`. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShipwrightToml {
    #[serde(default)]
    pub assistant: AssistantSection,
    #[serde(default)]
    pub timeouts: TimeoutsSection,
    #[serde(default)]
    pub ci: CiSection,
    #[serde(default)]
    pub split: SplitSection,
    #[serde(default)]
    pub workflow: WorkflowSection,
    /// Extra environment passed to every external command.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ShipwrightToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse shipwright.toml")
    }

    /// Load from `<state_dir>/shipwright.toml`, or defaults when absent.
    pub fn load_or_default(state_dir: &Path) -> Result<Self> {
        let path = state_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize shipwright.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides (`SHIPWRIGHT_ASSISTANT_CMD`, `SHIPWRIGHT_SKIP_PERMISSIONS`).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(cmd) = lookup("SHIPWRIGHT_ASSISTANT_CMD").filter(|c| !c.trim().is_empty()) {
            self.assistant.command = cmd;
        }
        if let Some(val) = lookup("SHIPWRIGHT_SKIP_PERMISSIONS") {
            self.assistant.skip_permissions = val != "false" && val != "0";
        }
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.assistant.command.trim().is_empty() {
            warnings.push("assistant.command is empty; falling back to 'claude'".to_string());
        }
        if !self.ci.ignore_pattern.is_empty() && Regex::new(&self.ci.ignore_pattern).is_err() {
            warnings.push(format!(
                "Invalid ci.ignore_pattern '{}': CI jobs will not be filtered",
                self.ci.ignore_pattern
            ));
        }
        if self.ci.poll_interval == 0 {
            warnings.push("ci.poll_interval is 0; using 1 second".to_string());
        }
        if self.ci.progress_interval == 0 {
            warnings.push("ci.progress_interval is 0; using 1 second".to_string());
        }
        if self.ci.persistent_threshold == 0 {
            warnings.push("ci.persistent_threshold is 0; every failure will be persistent".to_string());
        }
        if self.split.main_branch.trim().is_empty() {
            warnings.push("split.main_branch is empty; using 'main'".to_string());
        }
        for (name, secs) in [
            ("planning", self.timeouts.planning),
            ("implementation", self.timeouts.implementation),
            ("refactoring", self.timeouts.refactoring),
            ("split", self.timeouts.split),
            ("command", self.timeouts.command),
        ] {
            if secs == 0 {
                warnings.push(format!("timeouts.{} is 0; every call would time out", name));
            }
        }

        warnings
    }
}

/// Values supplied on the command line. `None` keeps the lower layer.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub assistant_cmd: Option<String>,
    pub planning_timeout: Option<u64>,
    pub implementation_timeout: Option<u64>,
    pub refactoring_timeout: Option<u64>,
    pub split: Option<bool>,
    pub verbose: bool,
    pub yes: bool,
}

#[derive(Debug, Clone)]
pub struct PhaseTimeouts {
    pub planning: Duration,
    pub implementation: Duration,
    pub refactoring: Duration,
    pub split: Duration,
    pub command: Duration,
}

#[derive(Debug, Clone)]
pub struct CiSettings {
    pub enabled: bool,
    pub timeout: Duration,
    pub initial_delay: Duration,
    pub poll_interval: Duration,
    pub progress_interval: Duration,
    pub ignore_pattern: Option<Regex>,
    pub persistent_threshold: u32,
    pub max_fix_attempts: u32,
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub repo_dir: PathBuf,
    pub state_dir: PathBuf,
    pub workflows_dir: PathBuf,
    pub worktrees_dir: PathBuf,
    pub log_dir: PathBuf,
    pub assistant_cmd: String,
    pub skip_permissions: bool,
    pub timeouts: PhaseTimeouts,
    pub ci: CiSettings,
    pub split_enabled: bool,
    pub main_branch: String,
    pub use_worktrees: bool,
    pub branch_prefix: String,
    pub env: BTreeMap<String, String>,
    pub verbose: bool,
    pub auto_approve: bool,
}

impl Config {
    /// Resolve configuration for `repo_dir` from file, process environment and CLI.
    pub fn load(repo_dir: &Path, cli: &CliOverrides) -> Result<Self> {
        let repo_dir = repo_dir
            .canonicalize()
            .with_context(|| format!("Failed to resolve directory {}", repo_dir.display()))?;
        let mut toml = ShipwrightToml::load_or_default(&repo_dir.join(STATE_DIR))?;
        toml.apply_env(|key| std::env::var(key).ok());
        for warning in toml.validate() {
            tracing::warn!(%warning, "configuration warning");
        }
        Ok(Self::resolve(repo_dir, toml, cli))
    }

    /// Build a config from already-loaded layers. Never touches the filesystem.
    pub fn resolve(repo_dir: PathBuf, toml: ShipwrightToml, cli: &CliOverrides) -> Self {
        let state_dir = repo_dir.join(STATE_DIR);
        let secs = |cli: Option<u64>, file: u64| Duration::from_secs(cli.unwrap_or(file));
        let at_least_one = |secs: u64| Duration::from_secs(secs.max(1));

        let assistant_cmd = cli
            .assistant_cmd
            .clone()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(toml.assistant.command);
        let assistant_cmd = if assistant_cmd.trim().is_empty() {
            default_assistant_cmd()
        } else {
            assistant_cmd
        };

        let ignore_pattern = if toml.ci.ignore_pattern.is_empty() {
            None
        } else {
            Regex::new(&toml.ci.ignore_pattern).ok()
        };

        let main_branch = if toml.split.main_branch.trim().is_empty() {
            default_main_branch()
        } else {
            toml.split.main_branch
        };

        Self {
            workflows_dir: state_dir.join("workflows"),
            worktrees_dir: state_dir.join("worktrees"),
            log_dir: state_dir.join("logs"),
            state_dir,
            repo_dir,
            assistant_cmd,
            skip_permissions: toml.assistant.skip_permissions,
            timeouts: PhaseTimeouts {
                planning: secs(cli.planning_timeout, toml.timeouts.planning),
                implementation: secs(cli.implementation_timeout, toml.timeouts.implementation),
                refactoring: secs(cli.refactoring_timeout, toml.timeouts.refactoring),
                split: Duration::from_secs(toml.timeouts.split),
                command: Duration::from_secs(toml.timeouts.command),
            },
            ci: CiSettings {
                enabled: toml.ci.enabled,
                timeout: Duration::from_secs(toml.ci.timeout),
                initial_delay: Duration::from_secs(toml.ci.initial_delay),
                poll_interval: at_least_one(toml.ci.poll_interval),
                progress_interval: at_least_one(toml.ci.progress_interval),
                ignore_pattern,
                persistent_threshold: toml.ci.persistent_threshold,
                max_fix_attempts: toml.ci.max_fix_attempts,
            },
            split_enabled: cli.split.unwrap_or(toml.split.enabled),
            main_branch,
            use_worktrees: toml.workflow.use_worktrees,
            branch_prefix: toml.workflow.branch_prefix,
            env: toml.env,
            verbose: cli.verbose,
            auto_approve: cli.yes,
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.workflows_dir)
            .context("Failed to create workflows directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        if self.use_worktrees {
            std::fs::create_dir_all(&self.worktrees_dir)
                .context("Failed to create worktrees directory")?;
        }
        Ok(())
    }

    /// Flags passed to the assistant CLI on every invocation.
    pub fn assistant_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if self.skip_permissions {
            flags.push("--dangerously-skip-permissions".to_string());
        }
        flags.push("--print".to_string());
        flags.push("--output-format".to_string());
        flags.push("stream-json".to_string());
        flags.push("--verbose".to_string());
        flags
    }

    /// Branch name used for a workflow.
    pub fn branch_for(&self, workflow: &str) -> String {
        if self.branch_prefix.is_empty() {
            workflow.to_string()
        } else {
            format!("{}/{}", self.branch_prefix.trim_end_matches('/'), workflow)
        }
    }

    pub fn worktree_path_for(&self, workflow: &str) -> PathBuf {
        self.worktrees_dir.join(workflow)
    }
}
