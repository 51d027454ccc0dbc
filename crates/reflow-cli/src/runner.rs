//! Local collaborators for the dispatcher: a job runner that replays scripted
//! outcomes, a console event printer and a directory report sink.

use async_trait::async_trait;
use console::style;
use regex::Regex;
use reflow_core::events::Event;
use reflow_core::ids::{JobId, RunId};
use reflow_core::ports::{Conclusion, EventBus, ExternalOutcome, JobRequest, JobRunner, ReportSink};
use reflow_core::run::{JobStatus, ReportArtifact, ReportFormat};
use reflow_core::{Error, Result};
use schemars::JsonSchema;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Outcome of one scripted job.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum OutcomeScript {
    /// Bare conclusion, e.g. `test: failure`.
    Conclusion(ScriptedConclusion),
    Detailed(DetailedOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ScriptedConclusion {
    Success,
    Failure,
    Skipped,
    /// The runner itself fails to execute the job.
    Error,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DetailedOutcome {
    pub conclusion: ScriptedConclusion,
    #[serde(default)]
    pub message: Option<String>,
    /// JSON or SARIF report, relative to the outcomes file.
    #[serde(default)]
    pub report: Option<PathBuf>,
    /// Simulated job duration.
    #[serde(default)]
    pub delay_ms: u64,
}

/// Outcomes file: job instance id (or job id, for every matrix cell) to outcome.
pub type OutcomeFile = BTreeMap<String, OutcomeScript>;

/// Job runner that replays outcomes from a file. Unscripted jobs succeed.
pub struct ScriptedRunner {
    scripts: OutcomeFile,
    base_dir: PathBuf,
}

impl ScriptedRunner {
    pub fn new(scripts: OutcomeFile, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            scripts,
            base_dir: base_dir.into(),
        }
    }

    /// Runner where every job succeeds.
    pub fn succeed_all() -> Self {
        Self::new(OutcomeFile::new(), ".")
    }

    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let scripts: OutcomeFile = crate::handlers::read_document(path).await?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(Self::new(scripts, base_dir))
    }

    fn script(&self, request: &JobRequest) -> Option<&OutcomeScript> {
        self.scripts
            .get(request.job_id.as_str())
            .or_else(|| self.scripts.get(request.job.as_str()))
    }

    async fn load_report(&self, relative: &Path) -> Result<ReportArtifact> {
        let path = self.base_dir.join(relative);
        let content = tokio::fs::read_to_string(&path).await?;
        let format = match path.extension().and_then(|e| e.to_str()) {
            Some("sarif") => ReportFormat::Sarif,
            _ => ReportFormat::Json,
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "report".to_string());
        Ok(ReportArtifact {
            name,
            format,
            content: serde_json::from_str(&content)?,
        })
    }
}

#[async_trait]
impl JobRunner for ScriptedRunner {
    async fn execute(&self, request: &JobRequest) -> Result<ExternalOutcome> {
        debug!(run_id = %request.run_id, job = %request.job_id, uses = %request.uses, "Executing scripted job");

        let detailed = match self.script(request) {
            None => return Ok(ExternalOutcome::success()),
            Some(OutcomeScript::Conclusion(conclusion)) => DetailedOutcome {
                conclusion: *conclusion,
                message: None,
                report: None,
                delay_ms: 0,
            },
            Some(OutcomeScript::Detailed(detailed)) => detailed.clone(),
        };

        if detailed.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(detailed.delay_ms)).await;
        }

        let conclusion = match detailed.conclusion {
            ScriptedConclusion::Success => Conclusion::Success,
            ScriptedConclusion::Failure => Conclusion::Failure,
            ScriptedConclusion::Skipped => Conclusion::Skipped,
            ScriptedConclusion::Error => {
                return Err(Error::Runner(
                    detailed
                        .message
                        .unwrap_or_else(|| format!("runner failed to execute {}", request.job_id)),
                ));
            }
        };

        let report = match &detailed.report {
            Some(path) => Some(self.load_report(path).await?),
            None => None,
        };

        Ok(ExternalOutcome {
            conclusion,
            report,
            message: detailed.message,
        })
    }

    async fn cancel(&self, run_id: RunId, job_id: &JobId) -> Result<()> {
        debug!(%run_id, job = %job_id, "Cancel requested for scripted job");
        Ok(())
    }
}

/// Prints lifecycle events to stderr as they happen.
pub struct ConsoleEvents;

#[async_trait]
impl EventBus for ConsoleEvents {
    async fn publish(&self, event: Event) -> Result<()> {
        match &event {
            Event::RunQueued(p) => eprintln!(
                "{} Run {} queued for {} ({} jobs, group {})",
                style("▶").cyan(),
                p.run_id,
                style(&p.workflow).bold(),
                p.job_count,
                p.group
            ),
            Event::JobCompleted(p) => {
                let marker = match p.status {
                    JobStatus::Success => style("✓").green(),
                    JobStatus::Failure if p.blocking => style("✗").red(),
                    JobStatus::Failure => style("✗").yellow(),
                    JobStatus::Cancelled => style("!").yellow(),
                    _ => style("-").dim(),
                };
                let detail = match (&p.skip_reason, &p.cancel_reason) {
                    (Some(reason), _) => format!(" ({reason})"),
                    (_, Some(reason)) => format!(" ({reason})"),
                    _ => String::new(),
                };
                eprintln!("  {marker} {} {}{detail}", p.job_id, p.status);
            }
            Event::RunCancelled(p) => eprintln!(
                "{} Run {} cancelled: {} ({} jobs stopped)",
                style("!").yellow(),
                p.run_id,
                p.reason,
                p.cancelled_jobs.len()
            ),
            Event::RunCompleted(_) => {}
        }
        Ok(())
    }
}

/// Writes forwarded reports to `<dir>/<run id>/<job>__<report name>`.
pub struct DirectoryReportSink {
    dir: PathBuf,
    unsafe_chars: Regex,
}

impl DirectoryReportSink {
    pub fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self {
            dir: dir.into(),
            unsafe_chars: Regex::new(r"[^A-Za-z0-9._-]+")?,
        })
    }

    fn file_name(&self, job_id: &JobId, report: &ReportArtifact) -> String {
        let job = self.unsafe_chars.replace_all(job_id.as_str(), "_");
        let name = self.unsafe_chars.replace_all(&report.name, "_");
        format!("{}__{}", job.trim_matches('_'), name)
    }

    pub fn path_for(&self, run_id: RunId, job_id: &JobId, report: &ReportArtifact) -> PathBuf {
        self.dir
            .join(run_id.to_string())
            .join(self.file_name(job_id, report))
    }
}

#[async_trait]
impl ReportSink for DirectoryReportSink {
    async fn publish(&self, run_id: RunId, job_id: &JobId, report: &ReportArtifact) -> Result<()> {
        let path = self.path_for(run_id, job_id, report);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::ReportSink(format!("{}: {e}", parent.display())))?;
        }
        let body = serde_json::to_vec_pretty(&report.content)?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| Error::ReportSink(format!("{}: {e}", path.display())))?;
        info!(%run_id, job = %job_id, path = %path.display(), "Report written");
        Ok(())
    }
}
