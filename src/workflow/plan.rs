//! Implementation plan produced by the Planning phase.

use std::collections::HashSet;
use std::fmt;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::util::extract_json_object;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Complexity::Low => "low",
            Complexity::Medium => "medium",
            Complexity::High => "high",
        };
        f.pad(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Architecture {
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub components: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanPhase {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub estimated_lines: u32,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkStream {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<String>,
    /// Ids of work streams that must finish first.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Risk {
    pub description: String,
    #[serde(default)]
    pub mitigation: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeEstimate {
    #[serde(default)]
    pub total_lines: u32,
    #[serde(default)]
    pub total_files: u32,
}

/// Immutable once written by the Planning phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub summary: String,
    #[serde(default)]
    pub complexity: Complexity,
    #[serde(default)]
    pub architecture: Architecture,
    pub phases: Vec<PlanPhase>,
    #[serde(default)]
    pub work_streams: Vec<WorkStream>,
    #[serde(default)]
    pub risks: Vec<Risk>,
    #[serde(default)]
    pub estimates: SizeEstimate,
}

impl Plan {
    /// JSON schema the assistant is asked to follow.
    pub fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["summary", "complexity", "architecture", "phases", "estimates"],
            "properties": {
                "summary": {"type": "string"},
                "complexity": {"type": "string", "enum": ["low", "medium", "high"]},
                "architecture": {
                    "type": "object",
                    "properties": {
                        "overview": {"type": "string"},
                        "components": {"type": "array", "items": {"type": "string"}}
                    }
                },
                "phases": {
                    "type": "array",
                    "minItems": 1,
                    "items": {
                        "type": "object",
                        "required": ["name", "description", "estimated_lines"],
                        "properties": {
                            "name": {"type": "string"},
                            "description": {"type": "string"},
                            "estimated_lines": {"type": "integer"},
                            "files": {"type": "array", "items": {"type": "string"}}
                        }
                    }
                },
                "work_streams": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["id", "name"],
                        "properties": {
                            "id": {"type": "string"},
                            "name": {"type": "string"},
                            "tasks": {"type": "array", "items": {"type": "string"}},
                            "depends_on": {"type": "array", "items": {"type": "string"}}
                        }
                    }
                },
                "risks": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["description"],
                        "properties": {
                            "description": {"type": "string"},
                            "mitigation": {"type": "string"}
                        }
                    }
                },
                "estimates": {
                    "type": "object",
                    "properties": {
                        "total_lines": {"type": "integer"},
                        "total_files": {"type": "integer"}
                    }
                }
            }
        })
    }

    /// Parse a plan from a structured value, then validate it.
    pub fn from_value(value: Value) -> Result<Self> {
        let plan: Plan = serde_json::from_value(value).context("Plan does not match schema")?;
        plan.validate()?;
        Ok(plan)
    }

    /// Parse a plan from free-form assistant output containing a JSON object.
    pub fn from_output(output: &str) -> Result<Self> {
        let json = extract_json_object(output).context("No JSON object found in planning output")?;
        let value: Value = serde_json::from_str(&json).context("Planning output is not valid JSON")?;
        Self::from_value(value)
    }

    pub fn validate(&self) -> Result<()> {
        if self.summary.trim().is_empty() {
            bail!("plan summary is empty");
        }
        if self.phases.is_empty() {
            bail!("plan has no phases");
        }

        let ids: HashSet<&str> = self.work_streams.iter().map(|w| w.id.as_str()).collect();
        if ids.len() != self.work_streams.len() {
            bail!("work stream ids are not unique");
        }
        for stream in &self.work_streams {
            for dep in &stream.depends_on {
                if dep == &stream.id {
                    bail!("work stream '{}' depends on itself", stream.id);
                }
                if !ids.contains(dep.as_str()) {
                    bail!("work stream '{}' depends on unknown stream '{}'", stream.id, dep);
                }
            }
        }
        Ok(())
    }

    /// Sum of phase estimates, used when the assistant leaves `estimates` empty.
    pub fn estimated_lines(&self) -> u32 {
        if self.estimates.total_lines > 0 {
            self.estimates.total_lines
        } else {
            self.phases.iter().map(|p| p.estimated_lines).sum()
        }
    }

    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse plan JSON: {}", path.display()))
    }
}
