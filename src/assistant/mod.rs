//! Coding assistant executor.
//!
//! [`AssistantExecutor`] runs one prompt to completion. [`ClaudeExecutor`]
//! drives the `claude` CLI in `--print` mode with `stream-json` output,
//! passing the prompt on stdin.

pub mod stream;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::AssistantError;
use crate::exec::{CommandRunner, CommandSpec};
use crate::util::{extract_json_object, truncate};

pub use stream::{AssistantEvent, StreamCollector};

#[derive(Debug, Clone)]
pub struct AssistantRequest {
    pub prompt: String,
    /// When set, the reply must contain one JSON object matching this schema.
    pub schema: Option<Value>,
    pub timeout: Duration,
    pub working_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AssistantResponse {
    pub output: String,
    /// Parsed JSON object, present when a schema was requested and found.
    pub structured: Option<Value>,
    pub exit_code: i32,
    pub duration: Duration,
}

pub type ProgressFn<'a> = &'a (dyn Fn(AssistantEvent) + Send + Sync);

#[async_trait]
pub trait AssistantExecutor: Send + Sync {
    async fn execute(
        &self,
        request: &AssistantRequest,
        on_progress: ProgressFn<'_>,
    ) -> Result<AssistantResponse, AssistantError>;
}

/// Append the output contract for structured replies.
fn prompt_with_schema(prompt: &str, schema: &Value) -> String {
    let schema = serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
    format!(
        "{}\n\n## Output format\n\nEnd your reply with a single JSON object matching this schema. \
         Do not wrap it in prose after the object.\n\n```json\n{}\n```\n",
        prompt.trim_end(),
        schema
    )
}

pub struct ClaudeExecutor {
    runner: Arc<dyn CommandRunner>,
    command: String,
    flags: Vec<String>,
    env: BTreeMap<String, String>,
}

impl ClaudeExecutor {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        command: impl Into<String>,
        flags: Vec<String>,
        env: BTreeMap<String, String>,
    ) -> Self {
        Self {
            runner,
            command: command.into(),
            flags,
            env,
        }
    }
}

#[async_trait]
impl AssistantExecutor for ClaudeExecutor {
    async fn execute(
        &self,
        request: &AssistantRequest,
        on_progress: ProgressFn<'_>,
    ) -> Result<AssistantResponse, AssistantError> {
        let prompt = match &request.schema {
            Some(schema) => prompt_with_schema(&request.prompt, schema),
            None => request.prompt.clone(),
        };
        let spec = CommandSpec {
            program: self.command.clone(),
            args: self.flags.clone(),
            dir: request.working_dir.clone(),
            env: self.env.clone(),
            timeout: request.timeout,
            stdin: Some(prompt),
        };
        tracing::debug!(
            command = %spec.display(),
            dir = %request.working_dir.display(),
            timeout_secs = request.timeout.as_secs(),
            "invoking assistant"
        );

        let start = Instant::now();
        let collector = Mutex::new(StreamCollector::default());
        let on_line = |line: &str| {
            let events = match collector.lock() {
                Ok(mut c) => c.push_line(line),
                Err(_) => Vec::new(),
            };
            for event in events {
                on_progress(event);
            }
        };
        let output = self.runner.run_streaming(&spec, &on_line).await?;
        let duration = start.elapsed();

        let collector = collector
            .into_inner()
            .map_err(|_| AssistantError::InvalidOutput("stream collector poisoned".into()))?;
        let is_error = collector.is_error();
        let text = collector.finish();

        if !output.success() || is_error {
            let message = if output.stderr.trim().is_empty() {
                truncate(text.trim(), 500)
            } else {
                truncate(output.stderr.trim(), 500)
            };
            tracing::warn!(exit_code = output.exit_code, "assistant failed");
            return Err(AssistantError::Failed {
                exit_code: output.exit_code,
                message,
            });
        }

        let structured = if request.schema.is_some() {
            let json = extract_json_object(&text).ok_or_else(|| {
                AssistantError::InvalidOutput("reply contains no JSON object".into())
            })?;
            let value = serde_json::from_str(&json).map_err(|e| {
                AssistantError::InvalidOutput(format!("reply JSON does not parse: {}", e))
            })?;
            Some(value)
        } else {
            None
        };

        tracing::info!(
            duration_secs = duration.as_secs(),
            output_len = text.len(),
            "assistant finished"
        );
        Ok(AssistantResponse {
            output: text,
            structured,
            exit_code: output.exit_code,
            duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedRunner;
    use serde_json::json;

    fn executor(runner: Arc<ScriptedRunner>) -> ClaudeExecutor {
        ClaudeExecutor::new(
            runner,
            "claude",
            vec!["--print".into(), "--output-format".into(), "stream-json".into()],
            BTreeMap::new(),
        )
    }

    fn request(schema: Option<Value>) -> AssistantRequest {
        AssistantRequest {
            prompt: "Plan the work".into(),
            schema,
            timeout: Duration::from_secs(60),
            working_dir: PathBuf::from("/repo"),
        }
    }

    const TRANSCRIPT: &str = concat!(
        r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Read","input":{"file_path":"src/lib.rs"}}]}}"#,
        "\n",
        r#"{"type":"result","subtype":"success","result":"Here you go {\"summary\": \"s\"}","is_error":false}"#,
        "\n"
    );

    #[tokio::test]
    async fn test_structured_reply_and_progress() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_ok(TRANSCRIPT);
        let events = Mutex::new(Vec::new());
        let response = executor(runner.clone())
            .execute(&request(Some(json!({"type": "object"}))), &|e: AssistantEvent| {
                events.lock().unwrap().push(e)
            })
            .await
            .unwrap();

        assert_eq!(response.structured, Some(json!({"summary": "s"})));
        assert_eq!(events.lock().unwrap().len(), 1);

        let spec = &runner.specs()[0];
        assert_eq!(spec.program, "claude");
        assert_eq!(spec.dir, PathBuf::from("/repo"));
        let stdin = spec.stdin.as_deref().unwrap();
        assert!(stdin.starts_with("Plan the work"));
        assert!(stdin.contains("## Output format"));
    }

    #[tokio::test]
    async fn test_missing_json_is_invalid_output() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_ok("no json here\n");
        let err = executor(runner)
            .execute(&request(Some(json!({}))), &|_: AssistantEvent| {})
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::InvalidOutput(_)));
    }

    #[tokio::test]
    async fn test_plain_request_skips_json() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_ok("done\n");
        let response = executor(runner.clone())
            .execute(&request(None), &|_: AssistantEvent| {})
            .await
            .unwrap();
        assert!(response.structured.is_none());
        assert_eq!(response.output, "done\n");
        assert_eq!(runner.specs()[0].stdin.as_deref(), Some("Plan the work"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failed() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_exit(2, "", "rate limited");
        let err = executor(runner)
            .execute(&request(None), &|_: AssistantEvent| {})
            .await
            .unwrap_err();
        match err {
            AssistantError::Failed { exit_code, message } => {
                assert_eq!(exit_code, 2);
                assert_eq!(message, "rate limited");
            }
            other => panic!("Expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_tool_missing() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_not_found();
        let err = executor(runner)
            .execute(&request(None), &|_: AssistantEvent| {})
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::ToolMissing { .. }));
    }
}
