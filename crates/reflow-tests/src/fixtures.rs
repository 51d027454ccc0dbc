//! Test fixtures for creating sample workflows, events and secret stores.

use reflow_core::context::EventContext;
use reflow_core::ids::JobId;
use reflow_core::workflow::{ConcurrencyConfig, JobSpec, MatrixConfig, WorkflowDefinition};
use reflow_secrets::{FileProvider, SecretManager};
use std::sync::Arc;

/// A Python library's CI workflow exercising every gate kind.
pub const PYTHON_CI: &str = r#"
name: python-ci
description: Lint, test matrix, scanners and a summary job
on: [push, pull_request, schedule, workflow_dispatch]
concurrency:
  cancel_in_progress: true
inputs:
  scan-mode:
    type: choice
    options: [essential, comprehensive]
    default: essential
matrix:
  pr_versions: ["3.11", "3.12"]
  comprehensive_versions: ["3.10", "3.11", "3.12", "3.13"]
jobs:
  - id: lint
  - id: test
    uses: test
    needs: [lint]
    matrix: true
  - id: security
    uses: security-scan
    needs: [lint]
    blocking: false
    with:
      tool: bandit
  - id: sonar
    uses: sonarcloud
    needs: [test]
    secrets: [SONAR_TOKEN]
    skip_if_no_token: true
  - id: fuzz
    uses: fuzz
    cost: expensive
    requires_scan_mode: comprehensive
    with:
      fuzz-seconds: 300
  - id: report
    needs: [test, security]
    if: "${{ always() }}"
"#;

/// Factory for test workflows.
pub struct WorkflowFixture;

impl WorkflowFixture {
    pub fn python_ci() -> WorkflowDefinition {
        serde_yaml::from_str(PYTHON_CI).expect("python-ci fixture parses")
    }

    /// One job with an explicit skip-on-draft flag.
    pub fn draft_gated(skip_on_draft: bool) -> WorkflowDefinition {
        let mut test = JobSpec::new("test");
        test.skip_on_draft = Some(skip_on_draft);
        WorkflowDefinition::new("draft-gated", vec![test])
    }

    /// Independent jobs with no dependency edges.
    pub fn independent(ids: &[&str], fail_fast: bool) -> WorkflowDefinition {
        let mut wf = WorkflowDefinition::new(
            "independent",
            ids.iter().map(|id| JobSpec::new(*id)).collect(),
        );
        wf.fail_fast = fail_fast;
        wf
    }

    /// `lint` then `test`, cancelling superseded runs.
    pub fn lint_then_test() -> WorkflowDefinition {
        let mut wf = WorkflowDefinition::new("wf", vec![JobSpec::new("lint"), job("test", &["lint"])]);
        wf.concurrency = Some(ConcurrencyConfig {
            group: None,
            cancel_in_progress: true,
        });
        wf
    }

    /// A matrix-expanded `test` job over the tiered version sets.
    pub fn tiered_matrix(pr: &[&str], comprehensive: &[&str]) -> WorkflowDefinition {
        let mut test = JobSpec::new("test");
        test.matrix = true;
        let mut wf = WorkflowDefinition::new("matrix", vec![test]);
        wf.matrix = Some(MatrixConfig::new(pr, comprehensive));
        wf
    }
}

/// Job with dependencies.
pub fn job(id: &str, needs: &[&str]) -> JobSpec {
    let mut spec = JobSpec::new(id);
    spec.needs = needs.iter().map(|n| JobId::new(*n)).collect();
    spec
}

/// Factory for event contexts.
pub struct EventFixture;

impl EventFixture {
    pub fn push_main() -> EventContext {
        EventContext::push("refs/heads/main").with_actor("octocat")
    }

    pub fn pull_request(number: u64) -> EventContext {
        EventContext::pull_request(number, false).with_actor("octocat")
    }

    pub fn draft_pull_request(number: u64) -> EventContext {
        EventContext::pull_request(number, true).with_actor("octocat")
    }

    pub fn nightly() -> EventContext {
        EventContext::schedule("refs/heads/main")
    }
}

/// Secret manager backed by an in-memory file provider.
pub fn secret_store(entries: &[(&str, &str)]) -> Arc<SecretManager> {
    let provider = FileProvider::from_map(
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    );
    Arc::new(SecretManager::default().with_provider(Arc::new(provider)))
}
