//! Workflow definition types.
//!
//! These types represent the caller-authored workflow YAML: the jobs a
//! reusable workflow runs, how each is gated and which integration it calls.

use crate::context::TriggerKind;
use crate::ids::{JobId, WorkflowId};
use crate::params::{ParamSpec, ParamValues};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowDefinition {
    pub name: WorkflowId,
    #[serde(default)]
    pub description: Option<String>,
    /// Triggers this workflow responds to. Empty means every trigger.
    #[serde(default)]
    pub on: Vec<TriggerKind>,
    /// Manual-dispatch parameters.
    #[serde(default)]
    pub inputs: BTreeMap<String, ParamSpec>,
    #[serde(default)]
    pub matrix: Option<MatrixConfig>,
    #[serde(default)]
    pub concurrency: Option<ConcurrencyConfig>,
    #[serde(default)]
    pub fail_fast: bool,
    /// Scan mode used when the event does not request one.
    #[serde(default)]
    pub scan_mode: ScanMode,
    pub jobs: Vec<JobSpec>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, jobs: Vec<JobSpec>) -> Self {
        Self {
            name: WorkflowId::new(name),
            description: None,
            on: vec![],
            inputs: BTreeMap::new(),
            matrix: None,
            concurrency: None,
            fail_fast: false,
            scan_mode: ScanMode::Essential,
            jobs,
        }
    }

    pub fn job(&self, id: &JobId) -> Option<&JobSpec> {
        self.jobs.iter().find(|j| &j.id == id)
    }

    pub fn applies_to(&self, trigger: TriggerKind) -> bool {
        self.on.is_empty() || self.on.contains(&trigger)
    }

    pub fn cancel_in_progress(&self) -> bool {
        self.concurrency
            .as_ref()
            .map(|c| c.cancel_in_progress)
            .unwrap_or(true)
    }
}

/// Tiered version/OS matrix.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MatrixConfig {
    /// Versions tested on pull requests.
    #[serde(default)]
    pub pr_versions: Vec<String>,
    /// Versions tested on push, schedule and manual dispatch.
    #[serde(default)]
    pub comprehensive_versions: Vec<String>,
    #[serde(default)]
    pub os: Vec<String>,
    /// Used when the selected tier is empty.
    #[serde(default)]
    pub default_version: Option<String>,
    #[serde(default = "default_version_axis")]
    pub version_axis: String,
    #[serde(default = "default_os_axis")]
    pub os_axis: String,
    #[serde(default)]
    pub exclude: Vec<BTreeMap<String, String>>,
}

fn default_version_axis() -> String {
    "version".to_string()
}

fn default_os_axis() -> String {
    "os".to_string()
}

impl MatrixConfig {
    pub fn new(pr_versions: &[&str], comprehensive_versions: &[&str]) -> Self {
        Self {
            pr_versions: pr_versions.iter().map(|v| v.to_string()).collect(),
            comprehensive_versions: comprehensive_versions
                .iter()
                .map(|v| v.to_string())
                .collect(),
            os: vec![],
            default_version: None,
            version_axis: default_version_axis(),
            os_axis: default_os_axis(),
            exclude: vec![],
        }
    }

    pub fn with_os(mut self, os: &[&str]) -> Self {
        self.os = os.iter().map(|o| o.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConcurrencyConfig {
    /// Replaces the workflow name as the group key prefix.
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default = "default_true")]
    pub cancel_in_progress: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    #[default]
    Essential,
    Comprehensive,
}

impl ScanMode {
    /// Parse a requested mode. Unknown modes fail closed to the cheaper one.
    pub fn parse_or_essential(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "comprehensive" => ScanMode::Comprehensive,
            _ => ScanMode::Essential,
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanMode::Essential => f.write_str("essential"),
            ScanMode::Comprehensive => f.write_str("comprehensive"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CostClass {
    #[default]
    Cheap,
    Expensive,
}

/// Centrally maintained integration a job delegates to.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "kebab-case")]
pub enum Integration {
    Test,
    Fuzz,
    PypiPublish,
    Sonarcloud,
    FipsCompat,
    Coverage,
    SecurityScan,
    Qlty,
    #[default]
    Custom,
}

impl Integration {
    /// Recognised `with:` options and their defaults.
    pub fn options(&self) -> BTreeMap<String, ParamSpec> {
        let entries: Vec<(&str, ParamSpec)> = match self {
            Integration::Fuzz => vec![
                (
                    "sanitizer",
                    ParamSpec::choice(&["address", "undefined", "memory"], "address"),
                ),
                ("fuzz-seconds", ParamSpec::number(600.0)),
                ("dry-run", ParamSpec::boolean(false)),
            ],
            Integration::PypiPublish => vec![
                ("use-testpypi", ParamSpec::boolean(false)),
                ("dry-run", ParamSpec::boolean(false)),
            ],
            Integration::Sonarcloud => vec![("fail-on-quality-gate", ParamSpec::boolean(false))],
            Integration::SecurityScan => vec![(
                "tool",
                ParamSpec::choice(&["safety", "bandit", "codeql"], "codeql"),
            )],
            Integration::Coverage => vec![("threshold", ParamSpec::number(80.0))],
            Integration::Test | Integration::Custom => vec![("command", ParamSpec::string())],
            Integration::FipsCompat | Integration::Qlty => vec![],
        };
        entries
            .into_iter()
            .map(|(name, spec)| (name.to_string(), spec))
            .collect()
    }
}

impl fmt::Display for Integration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Integration::Test => "test",
            Integration::Fuzz => "fuzz",
            Integration::PypiPublish => "pypi-publish",
            Integration::Sonarcloud => "sonarcloud",
            Integration::FipsCompat => "fips-compat",
            Integration::Coverage => "coverage",
            Integration::SecurityScan => "security-scan",
            Integration::Qlty => "qlty",
            Integration::Custom => "custom",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobSpec {
    pub id: JobId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub uses: Integration,
    #[serde(default)]
    pub with: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub needs: Vec<JobId>,
    #[serde(default, rename = "if")]
    pub condition: Option<String>,
    /// Defaults to `true` for expensive jobs.
    #[serde(default)]
    pub skip_on_draft: Option<bool>,
    #[serde(default)]
    pub skip_if_no_token: bool,
    #[serde(default)]
    pub requires_scan_mode: Option<ScanMode>,
    #[serde(default)]
    pub cost: CostClass,
    #[serde(default)]
    pub secrets: Vec<String>,
    /// Advisory jobs (`blocking: false`) never fail the run.
    #[serde(default)]
    pub blocking: Option<bool>,
    /// Expand this job over the workflow matrix.
    #[serde(default)]
    pub matrix: bool,
}

impl JobSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: JobId::new(id),
            name: None,
            uses: Integration::Custom,
            with: BTreeMap::new(),
            needs: vec![],
            condition: None,
            skip_on_draft: None,
            skip_if_no_token: false,
            requires_scan_mode: None,
            cost: CostClass::Cheap,
            secrets: vec![],
            blocking: None,
            matrix: false,
        }
    }

    pub fn skips_on_draft(&self) -> bool {
        self.skip_on_draft
            .unwrap_or(self.cost == CostClass::Expensive)
    }

    /// Whether a failure of this job fails the run.
    ///
    /// SonarCloud jobs are advisory unless `fail-on-quality-gate` is set.
    pub fn is_blocking(&self, options: &ParamValues) -> bool {
        self.blocking.unwrap_or_else(|| match self.uses {
            Integration::Sonarcloud => options
                .get("fail-on-quality-gate")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            _ => true,
        })
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }
}
