//! On-disk workflow persistence.
//!
//! Layout under the workflows root:
//!
//! ```text
//! <name>/state.json   full Workflow record, rewritten after every transition
//! <name>/plan.json    Plan produced by the Planning phase
//! <name>/logs/        assistant prompts and outputs
//! <name>/.lock        advisory lock held while a process drives the workflow
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::Serialize;

use super::{Plan, Workflow, validate_name};
use crate::errors::OrchestratorError;

const STATE_FILE: &str = "state.json";
const PLAN_FILE: &str = "plan.json";
const LOCK_FILE: &str = ".lock";

pub struct StateManager {
    root: PathBuf,
}

/// Exclusive claim on one workflow. Released on drop.
#[derive(Debug)]
pub struct WorkflowLock {
    file: File,
    path: PathBuf,
}

impl WorkflowLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkflowLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::debug!(path = %self.path.display(), error = %e, "failed to release workflow lock");
        }
    }
}

/// Write `content` next to `path` and rename it into place.
fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp)
            .with_context(|| format!("Failed to create {}", tmp.display()))?;
        file.write_all(content)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        file.sync_all()
            .with_context(|| format!("Failed to sync {}", tmp.display()))?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_vec_pretty(value).context("Failed to serialize to JSON")?;
    write_atomic(path, &content)
}

impl StateManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn workflow_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn log_dir(&self, name: &str) -> PathBuf {
        self.workflow_dir(name).join("logs")
    }

    pub fn exists(&self, name: &str) -> bool {
        self.workflow_dir(name).join(STATE_FILE).exists()
    }

    /// Take the exclusive lock for `name`, creating its directory if needed.
    pub fn lock(&self, name: &str) -> Result<WorkflowLock, OrchestratorError> {
        validate_name(name)?;
        let dir = self.workflow_dir(name);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create workflow directory {}", dir.display()))?;

        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;

        if file.try_lock_exclusive().is_err() {
            return Err(OrchestratorError::InUse {
                name: name.to_string(),
            });
        }
        tracing::debug!(workflow = name, "acquired workflow lock");
        Ok(WorkflowLock { file, path })
    }

    pub fn save(&self, workflow: &Workflow) -> Result<()> {
        let dir = self.workflow_dir(&workflow.name);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create workflow directory {}", dir.display()))?;
        write_json(&dir.join(STATE_FILE), workflow)?;
        tracing::debug!(
            workflow = %workflow.name,
            phase = %workflow.current_phase,
            "workflow state saved"
        );
        Ok(())
    }

    pub fn load(&self, name: &str) -> Result<Workflow, OrchestratorError> {
        validate_name(name)?;
        let path = self.workflow_dir(name).join(STATE_FILE);
        if !path.exists() {
            return Err(OrchestratorError::NotFound {
                name: name.to_string(),
            });
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read workflow state: {}", path.display()))?;
        let workflow = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse workflow state: {}", path.display()))?;
        Ok(workflow)
    }

    /// Every persisted workflow, oldest first. Unreadable records are skipped.
    pub fn list(&self) -> Result<Vec<Workflow>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut workflows = Vec::new();
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("Failed to read {}", self.root.display()))?;
        for entry in entries {
            let entry = entry.context("Failed to read workflow directory entry")?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !entry.path().join(STATE_FILE).exists() {
                continue;
            }
            match self.load(&name) {
                Ok(workflow) => workflows.push(workflow),
                Err(e) => tracing::warn!(workflow = %name, error = %e, "skipping unreadable workflow"),
            }
        }
        workflows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        Ok(workflows)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let dir = self.workflow_dir(name);
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("Failed to remove {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn save_plan(&self, name: &str, plan: &Plan) -> Result<()> {
        let dir = self.workflow_dir(name);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create workflow directory {}", dir.display()))?;
        write_json(&dir.join(PLAN_FILE), plan)
    }

    pub fn load_plan(&self, name: &str) -> Result<Option<Plan>> {
        let path = self.workflow_dir(name).join(PLAN_FILE);
        if !path.exists() {
            return Ok(None);
        }
        Plan::load(&path).map(Some)
    }

    /// Write an assistant transcript under the workflow's log directory.
    pub fn write_log(&self, name: &str, file_name: &str, content: &str) -> Result<PathBuf> {
        let dir = self.log_dir(name);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
        let path = dir.join(file_name);
        fs::write(&path, content)
            .with_context(|| format!("Failed to write log {}", path.display()))?;
        Ok(path)
    }
}
