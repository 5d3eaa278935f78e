//! Command execution.
//!
//! Every external program (`git`, `gh`, the assistant CLI) is started through a
//! [`CommandRunner`]. A non-zero exit status is *not* an error at this layer;
//! callers inspect [`CommandOutput::exit_code`] and decide.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::errors::ExecError;

/// A single program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub dir: PathBuf,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
    pub stdin: Option<String>,
}

impl CommandSpec {
    /// `git status` and friends; shown in logs and error messages.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Captured result of a finished program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Directory, environment and timeout shared by a family of invocations.
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub dir: PathBuf,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl ExecContext {
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            env: BTreeMap::new(),
            timeout,
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Same environment and timeout, different working directory.
    pub fn in_dir(&self, dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            env: self.env.clone(),
            timeout: self.timeout,
        }
    }

    pub fn command<S: AsRef<str>>(&self, program: &str, args: &[S]) -> CommandSpec {
        CommandSpec {
            program: program.to_string(),
            args: args.iter().map(|a| a.as_ref().to_string()).collect(),
            dir: self.dir.clone(),
            env: self.env.clone(),
            timeout: self.timeout,
            stdin: None,
        }
    }
}

/// Callback invoked for each stdout line of a streaming run.
pub type LineCallback<'a> = &'a (dyn Fn(&str) + Send + Sync);

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion and capture both streams.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError>;

    /// Like [`CommandRunner::run`] but reports stdout lines as they arrive.
    ///
    /// The default implementation replays captured stdout after the fact.
    async fn run_streaming(
        &self,
        spec: &CommandSpec,
        on_line: LineCallback<'_>,
    ) -> Result<CommandOutput, ExecError> {
        let output = self.run(spec).await?;
        for line in output.stdout.lines() {
            on_line(line);
        }
        Ok(output)
    }
}

/// Spawns real processes with `tokio::process`. Children are killed when a
/// run is cancelled or times out.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioCommandRunner;

impl TokioCommandRunner {
    fn spawn(spec: &CommandSpec) -> Result<tokio::process::Child, ExecError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.dir)
            .envs(&spec.env)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => ExecError::NotFound {
                program: spec.program.clone(),
            },
            _ => ExecError::Io {
                program: spec.program.clone(),
                source,
            },
        })?;

        if let Some(input) = spec.stdin.clone()
            && let Some(mut stdin) = child.stdin.take()
        {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    tracing::debug!(error = %e, "failed to write child stdin");
                }
            });
        }

        Ok(child)
    }

    fn io_error(spec: &CommandSpec, source: std::io::Error) -> ExecError {
        ExecError::Io {
            program: spec.program.clone(),
            source,
        }
    }
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
        tracing::debug!(command = %spec.display(), dir = ?spec.dir, timeout = ?spec.timeout, "spawning subprocess");
        let child = Self::spawn(spec)?;

        match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let result = CommandOutput {
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                    exit_code: output.status.code().unwrap_or(-1),
                };
                tracing::debug!(
                    command = %spec.program,
                    exit_code = result.exit_code,
                    stdout_len = result.stdout.len(),
                    "subprocess completed"
                );
                Ok(result)
            }
            Ok(Err(e)) => Err(Self::io_error(spec, e)),
            Err(_) => {
                tracing::warn!(command = %spec.display(), timeout = ?spec.timeout, "subprocess timed out");
                Err(ExecError::TimedOut {
                    program: spec.program.clone(),
                    timeout: spec.timeout,
                })
            }
        }
    }

    async fn run_streaming(
        &self,
        spec: &CommandSpec,
        on_line: LineCallback<'_>,
    ) -> Result<CommandOutput, ExecError> {
        tracing::debug!(command = %spec.program, dir = ?spec.dir, timeout = ?spec.timeout, "spawning streaming subprocess");
        let mut child = Self::spawn(spec)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Self::io_error(spec, std::io::Error::other("stdout not captured")))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| Self::io_error(spec, std::io::Error::other("stderr not captured")))?;

        // Drain stderr concurrently so a chatty child cannot block on a full pipe.
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let read_and_wait = async {
            let mut lines = BufReader::new(stdout).lines();
            let mut stdout_buf = String::new();
            while let Some(line) = lines.next_line().await? {
                on_line(&line);
                stdout_buf.push_str(&line);
                stdout_buf.push('\n');
            }
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((stdout_buf, status))
        };

        match tokio::time::timeout(spec.timeout, read_and_wait).await {
            Ok(Ok((stdout, status))) => {
                let stderr = stderr_task.await.unwrap_or_default();
                let result = CommandOutput {
                    stdout,
                    stderr,
                    exit_code: status.code().unwrap_or(-1),
                };
                tracing::debug!(
                    command = %spec.program,
                    exit_code = result.exit_code,
                    stdout_len = result.stdout.len(),
                    stderr_len = result.stderr.len(),
                    "streaming subprocess completed"
                );
                Ok(result)
            }
            Ok(Err(e)) => Err(Self::io_error(spec, e)),
            Err(_) => {
                tracing::warn!(command = %spec.program, timeout = ?spec.timeout, "streaming subprocess timed out");
                stderr_task.abort();
                Err(ExecError::TimedOut {
                    program: spec.program.clone(),
                    timeout: spec.timeout,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn ctx(timeout: Duration) -> ExecContext {
        ExecContext::new(std::env::temp_dir(), timeout)
    }

    #[tokio::test]
    async fn test_run_captures_output_and_nonzero_exit() {
        let spec = ctx(Duration::from_secs(10)).command("sh", &["-c", "echo out; echo err >&2; exit 3"]);
        let output = TokioCommandRunner.run(&spec).await.unwrap();
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert_eq!(output.exit_code, 3);
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_run_passes_env_and_stdin() {
        let mut env = BTreeMap::new();
        env.insert("SHIPWRIGHT_TEST_VAR".to_string(), "hello".to_string());
        let mut spec = ctx(Duration::from_secs(10))
            .with_env(env)
            .command("sh", &["-c", "printf \"$SHIPWRIGHT_TEST_VAR \"; cat"]);
        spec.stdin = Some("from stdin".to_string());

        let output = TokioCommandRunner.run(&spec).await.unwrap();
        assert_eq!(output.stdout, "hello from stdin");
    }

    #[tokio::test]
    async fn test_missing_program_is_not_found() {
        let spec = ctx(Duration::from_secs(10)).command::<&str>("shipwright-no-such-program", &[]);
        let err = TokioCommandRunner.run(&spec).await.unwrap_err();
        assert!(matches!(err, ExecError::NotFound { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let spec = ctx(Duration::from_millis(100)).command("sleep", &["5"]);
        let err = TokioCommandRunner.run(&spec).await.unwrap_err();
        assert!(matches!(err, ExecError::TimedOut { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_run_streaming_reports_each_line() {
        let seen = Mutex::new(Vec::new());
        let spec = ctx(Duration::from_secs(10)).command("sh", &["-c", "echo one; echo two"]);
        let output = TokioCommandRunner
            .run_streaming(&spec, &|line: &str| seen.lock().unwrap().push(line.to_string()))
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["one", "two"]);
        assert_eq!(output.stdout, "one\ntwo\n");
    }

    #[tokio::test]
    async fn test_run_streaming_timeout() {
        let spec = ctx(Duration::from_millis(100)).command("sh", &["-c", "echo start; sleep 5"]);
        let err = TokioCommandRunner
            .run_streaming(&spec, &|_: &str| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::TimedOut { .. }));
    }

    #[test]
    fn test_display_joins_args() {
        let spec = ctx(Duration::from_secs(1)).command("git", &["push", "-u", "origin", "x"]);
        assert_eq!(spec.display(), "git push -u origin x");
    }
}
