//! Splitting one large change into a stacked PR chain.
//!
//! The chain is `main <- parent <- child-1 <- child-2 <- ...`: the parent PR
//! targets the trunk and carries only a marker commit, each child targets the
//! branch before it.

pub mod manager;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::errors::SplitError;
use crate::util::slugify;

pub use manager::SplitManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitStrategy {
    /// Cherry-pick the listed commits, in order.
    ByCommit,
    /// Copy the listed files from the source branch and commit them.
    ByFile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildPrSpec {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub commits: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PRSplitPlan {
    pub strategy: SplitStrategy,
    pub parent_title: String,
    #[serde(default)]
    pub parent_description: String,
    pub children: Vec<ChildPrSpec>,
}

impl PRSplitPlan {
    /// JSON schema the assistant is asked to follow when proposing a split.
    pub fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["strategy", "parent_title", "children"],
            "properties": {
                "strategy": {"type": "string", "enum": ["by_commit", "by_file"]},
                "parent_title": {"type": "string"},
                "parent_description": {"type": "string"},
                "children": {
                    "type": "array",
                    "minItems": 1,
                    "items": {
                        "type": "object",
                        "required": ["title"],
                        "properties": {
                            "title": {"type": "string"},
                            "description": {"type": "string"},
                            "commits": {"type": "array", "items": {"type": "string"}},
                            "files": {"type": "array", "items": {"type": "string"}}
                        }
                    }
                }
            }
        })
    }

    /// Structural checks that need no external calls.
    pub fn validate(&self) -> Result<(), SplitError> {
        if self.parent_title.trim().is_empty() {
            return Err(SplitError::InvalidPlan("parent title is empty".into()));
        }
        if self.children.is_empty() {
            return Err(SplitError::InvalidPlan("plan has no child PRs".into()));
        }
        for (i, child) in self.children.iter().enumerate() {
            let n = i + 1;
            if child.title.trim().is_empty() {
                return Err(SplitError::InvalidPlan(format!("child {} has no title", n)));
            }
            let empty = match self.strategy {
                SplitStrategy::ByCommit => child.commits.is_empty(),
                SplitStrategy::ByFile => child.files.is_empty(),
            };
            if empty {
                return Err(SplitError::InvalidPlan(format!(
                    "child {} ('{}') lists nothing to apply",
                    n, child.title
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PRInfo {
    pub number: u64,
    pub url: String,
    pub title: String,
    pub description: String,
}

/// What a split created. Kept even on partial failure so it can be rolled back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PRSplitResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_pr: Option<PRInfo>,
    #[serde(default)]
    pub child_prs: Vec<PRInfo>,
    /// Every branch created, parent first then children in order.
    #[serde(default)]
    pub branches: Vec<String>,
    /// Branches that reached the remote, in push order.
    #[serde(default)]
    pub pushed_branches: Vec<String>,
    /// Branch that was checked out before the split started.
    #[serde(default)]
    pub source_branch: String,
}

impl PRSplitResult {
    pub fn pr_count(&self) -> usize {
        self.child_prs.len() + usize::from(self.parent_pr.is_some())
    }
}

pub fn parent_branch_name(source: &str) -> String {
    format!("{}-split-parent", source)
}

/// `n` is 1-based.
pub fn child_branch_name(source: &str, n: usize, title: &str) -> String {
    let slug = slugify(title, 40);
    if slug.is_empty() {
        format!("{}-split-{}", source, n)
    } else {
        format!("{}-split-{}-{}", source, n, slug)
    }
}

/// Parent PR body: its own description followed by a checklist of children.
pub fn parent_body_with_children(description: &str, children: &[PRInfo]) -> String {
    let mut body = String::new();
    if !description.trim().is_empty() {
        body.push_str(description.trim_end());
        body.push_str("\n\n");
    }
    body.push_str("## Child PRs\n\nMerge in order:\n\n");
    for child in children {
        body.push_str(&format!("- [ ] #{} {} ({})\n", child.number, child.title, child.url));
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(title: &str, commits: &[&str], files: &[&str]) -> ChildPrSpec {
        ChildPrSpec {
            title: title.into(),
            description: String::new(),
            commits: commits.iter().map(|s| s.to_string()).collect(),
            files: files.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_branch_names_are_deterministic() {
        assert_eq!(parent_branch_name("shipwright/auth"), "shipwright/auth-split-parent");
        assert_eq!(
            child_branch_name("shipwright/auth", 2, "Add Login Routes!"),
            "shipwright/auth-split-2-add-login-routes"
        );
        assert_eq!(child_branch_name("f", 1, "!!!"), "f-split-1");
    }

    #[test]
    fn test_validate() {
        let mut plan = PRSplitPlan {
            strategy: SplitStrategy::ByCommit,
            parent_title: "Auth".into(),
            parent_description: String::new(),
            children: vec![child("Models", &["abc"], &[])],
        };
        assert!(plan.validate().is_ok());

        plan.strategy = SplitStrategy::ByFile;
        assert!(matches!(plan.validate(), Err(SplitError::InvalidPlan(_))));

        plan.children.clear();
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_parent_body_lists_children() {
        let children = vec![
            PRInfo {
                number: 11,
                url: "https://x/pull/11".into(),
                title: "Models".into(),
                description: String::new(),
            },
            PRInfo {
                number: 12,
                url: "https://x/pull/12".into(),
                title: "Routes".into(),
                description: String::new(),
            },
        ];
        let body = parent_body_with_children("Overall change", &children);
        assert!(body.starts_with("Overall change\n\n## Child PRs"));
        assert!(body.contains("- [ ] #11 Models"));
        assert!(body.find("#11").unwrap() < body.find("#12").unwrap());
    }

    #[test]
    fn test_plan_deserializes_snake_case_strategy() {
        let plan: PRSplitPlan = serde_json::from_str(
            r#"{"strategy": "by_file", "parent_title": "P", "children": [{"title": "c", "files": ["a.rs"]}]}"#,
        )
        .unwrap();
        assert_eq!(plan.strategy, SplitStrategy::ByFile);
        assert!(plan.validate().is_ok());
    }
}
