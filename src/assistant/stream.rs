//! Parsing of the assistant CLI's `stream-json` output.

use serde::Deserialize;
use serde_json::Value;

use crate::util::truncate;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "assistant")]
    Assistant { message: AssistantMessage },

    #[serde(rename = "result")]
    Result {
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
    },

    #[serde(rename = "user")]
    User {},

    #[serde(rename = "system")]
    System {},
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "tool_use")]
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },

    #[serde(rename = "text")]
    Text { text: String },

    #[serde(other)]
    Other,
}

/// Progress reported while the assistant runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssistantEvent {
    ToolUse { tool: String, description: String },
    Thinking(String),
}

/// Accumulates a stream-json transcript into the final output text.
#[derive(Debug, Default)]
pub struct StreamCollector {
    text: String,
    result: Option<String>,
    is_error: bool,
}

impl StreamCollector {
    /// Feed one stdout line; returns the progress events it carried.
    pub fn push_line(&mut self, line: &str) -> Vec<AssistantEvent> {
        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }
        let Ok(event) = serde_json::from_str::<StreamEvent>(line) else {
            // Plain text output (no stream-json) is kept verbatim; unknown
            // JSON records are dropped.
            if serde_json::from_str::<Value>(line).is_err() {
                self.text.push_str(line);
                self.text.push('\n');
            }
            return Vec::new();
        };

        let mut events = Vec::new();
        match event {
            StreamEvent::Assistant { message } => {
                for block in message.content {
                    match block {
                        ContentBlock::ToolUse { name, input } => {
                            events.push(AssistantEvent::ToolUse {
                                description: describe_tool_use(&name, &input),
                                tool: name,
                            });
                        }
                        ContentBlock::Text { text } => {
                            self.text.push_str(&text);
                            self.text.push('\n');
                            let snippet = thinking_snippet(&text, 60);
                            if !snippet.is_empty() {
                                events.push(AssistantEvent::Thinking(snippet));
                            }
                        }
                        ContentBlock::Other => {}
                    }
                }
            }
            StreamEvent::Result { result, is_error } => {
                self.result = result;
                self.is_error = is_error;
            }
            StreamEvent::User {} | StreamEvent::System {} => {}
        }
        events
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }

    /// The final `result` record when present, else all text seen.
    pub fn finish(self) -> String {
        self.result.unwrap_or(self.text)
    }
}

fn path_arg(input: &Value) -> String {
    input
        .get("file_path")
        .and_then(|v| v.as_str())
        .map(shorten_path)
        .unwrap_or_else(|| "file".to_string())
}

pub fn describe_tool_use(name: &str, input: &Value) -> String {
    match name {
        "Read" => format!("Reading: {}", path_arg(input)),
        "Write" => format!("Creating: {}", path_arg(input)),
        "Edit" => format!("Editing: {}", path_arg(input)),
        "Bash" => {
            let cmd = input
                .get("command")
                .and_then(|v| v.as_str())
                .map(|s| truncate(s, 40))
                .unwrap_or_else(|| "command".to_string());
            format!("Running: {}", cmd)
        }
        "Glob" | "Grep" => {
            let pattern = input
                .get("pattern")
                .and_then(|v| v.as_str())
                .map(|s| truncate(s, 30))
                .unwrap_or_else(|| "*".to_string());
            format!("Searching: {}", pattern)
        }
        _ => name.to_string(),
    }
}

/// Last two path components.
fn shorten_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() <= 2 {
        path.to_string()
    } else {
        parts[parts.len() - 2..].join("/")
    }
}

fn thinking_snippet(text: &str, max_len: usize) -> String {
    let first_line = text.lines().next().unwrap_or(text);
    truncate(first_line.trim(), max_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collects_tool_use_and_text() {
        let mut collector = StreamCollector::default();
        let events = collector.push_line(
            r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Read","input":{"file_path":"/a/b/c.rs"},"id":"1"},{"type":"text","text":"Looking at the parser\nmore"}]},"session_id":"s"}"#,
        );
        assert_eq!(
            events,
            vec![
                AssistantEvent::ToolUse {
                    tool: "Read".into(),
                    description: "Reading: b/c.rs".into()
                },
                AssistantEvent::Thinking("Looking at the parser".into()),
            ]
        );
        assert_eq!(collector.finish(), "Looking at the parser\nmore\n");
    }

    #[test]
    fn test_result_record_wins() {
        let mut collector = StreamCollector::default();
        collector.push_line(r#"{"type":"assistant","message":{"content":[{"type":"text","text":"draft"}]}}"#);
        collector.push_line(r#"{"type":"result","subtype":"success","result":"{\"ok\":true}","is_error":false}"#);
        assert!(!collector.is_error());
        assert_eq!(collector.finish(), r#"{"ok":true}"#);
    }

    #[test]
    fn test_non_json_lines_are_kept() {
        let mut collector = StreamCollector::default();
        collector.push_line("plain output");
        collector.push_line(r#"{"type":"system","subtype":"init"}"#);
        collector.push_line("");
        assert_eq!(collector.finish(), "plain output\n");
    }

    #[test]
    fn test_error_result() {
        let mut collector = StreamCollector::default();
        collector.push_line(r#"{"type":"result","subtype":"error_max_turns","is_error":true}"#);
        assert!(collector.is_error());
    }

    #[test]
    fn test_describe_tool_use() {
        assert_eq!(
            describe_tool_use("Bash", &json!({"command": "cargo test"})),
            "Running: cargo test"
        );
        assert_eq!(describe_tool_use("Grep", &json!({"pattern": "fn main"})), "Searching: fn main");
        assert_eq!(describe_tool_use("WebFetch", &json!({})), "WebFetch");
    }
}
