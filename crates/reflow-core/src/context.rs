//! Inbound event context.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of event that started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Push,
    PullRequest,
    Schedule,
    WorkflowDispatch,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Push => "push",
            TriggerKind::PullRequest => "pull_request",
            TriggerKind::Schedule => "schedule",
            TriggerKind::WorkflowDispatch => "workflow_dispatch",
        }
    }

    /// Pull requests get fast feedback; everything else gets the full tier.
    pub fn is_fast_feedback(&self) -> bool {
        matches!(self, TriggerKind::PullRequest)
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TriggerKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "push" => Ok(TriggerKind::Push),
            "pull_request" | "pr" => Ok(TriggerKind::PullRequest),
            "schedule" => Ok(TriggerKind::Schedule),
            "workflow_dispatch" | "manual" => Ok(TriggerKind::WorkflowDispatch),
            other => Err(format!("unknown trigger: {other}")),
        }
    }
}

/// Immutable description of the event a run was dispatched for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EventContext {
    pub trigger: TriggerKind,
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub pr_number: Option<u64>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub base_ref: Option<String>,
    /// Raw manual-dispatch parameters, validated against the workflow's
    /// declared inputs at dispatch time.
    #[serde(default)]
    pub inputs: BTreeMap<String, serde_json::Value>,
}

impl EventContext {
    pub fn new(trigger: TriggerKind, git_ref: impl Into<String>) -> Self {
        Self {
            trigger,
            git_ref: git_ref.into(),
            pr_number: None,
            draft: false,
            actor: None,
            base_ref: None,
            inputs: BTreeMap::new(),
        }
    }

    pub fn push(git_ref: impl Into<String>) -> Self {
        Self::new(TriggerKind::Push, git_ref)
    }

    pub fn pull_request(number: u64, draft: bool) -> Self {
        let mut ctx = Self::new(TriggerKind::PullRequest, format!("refs/pull/{number}/merge"));
        ctx.pr_number = Some(number);
        ctx.draft = draft;
        ctx
    }

    pub fn schedule(git_ref: impl Into<String>) -> Self {
        Self::new(TriggerKind::Schedule, git_ref)
    }

    pub fn manual(git_ref: impl Into<String>) -> Self {
        Self::new(TriggerKind::WorkflowDispatch, git_ref)
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.inputs.insert(name.into(), value);
        self
    }

    /// Branch name with any `refs/heads/` prefix removed.
    pub fn branch(&self) -> &str {
        self.git_ref
            .strip_prefix("refs/heads/")
            .unwrap_or(&self.git_ref)
    }

    /// Draft status only has meaning on pull requests.
    pub fn is_draft_pull_request(&self) -> bool {
        self.trigger == TriggerKind::PullRequest && self.draft
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_strips_prefix() {
        assert_eq!(EventContext::push("refs/heads/main").branch(), "main");
        assert_eq!(EventContext::push("main").branch(), "main");
    }

    #[test]
    fn test_trigger_from_str() {
        assert_eq!("pull-request".parse::<TriggerKind>(), Ok(TriggerKind::PullRequest));
        assert_eq!("manual".parse::<TriggerKind>(), Ok(TriggerKind::WorkflowDispatch));
        assert!("release".parse::<TriggerKind>().is_err());
    }

    #[test]
    fn test_draft_only_counts_on_pull_requests() {
        let mut push = EventContext::push("refs/heads/main");
        push.draft = true;
        assert!(!push.is_draft_pull_request());
        assert!(EventContext::pull_request(42, true).is_draft_pull_request());
    }

    #[test]
    fn test_deserialize_from_yaml() {
        let yaml = r#"
trigger: pull_request
ref: refs/pull/7/merge
pr_number: 7
draft: true
actor: octocat
"#;
        let ctx: EventContext = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(ctx.trigger, TriggerKind::PullRequest);
        assert_eq!(ctx.pr_number, Some(7));
        assert!(ctx.draft);
        assert!(ctx.inputs.is_empty());
    }
}
